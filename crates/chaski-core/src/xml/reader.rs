//! Bounded incremental document reader

use super::{Element, TreeBuilder, XmlError};
use quick_xml::Reader;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tracing::debug;

/// Async reader failing once more than `limit` bytes have been read
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    total: u64,
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            total: 0,
        }
    }

    /// Bytes read so far
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                self.total += (buf.filled().len() - before) as u64;
                if self.total > self.limit {
                    // An error return must not hand out any bytes
                    buf.set_filled(before);
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Read too much data {}/{}", self.total, self.limit),
                    )));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Read one document off `reader`, stopping as soon as the root element closes.
///
/// No length prefix exists on the wire, so the end of the root element is the
/// end of the request. More than `limit` bytes is an error.
pub async fn read_document<R>(reader: R, limit: u64) -> Result<Element, XmlError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = Reader::from_reader(BufReader::new(BoundedReader::new(reader, limit)));
    let mut builder = TreeBuilder::default();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into_async(&mut buf).await?;
        if let Some(root) = builder.feed(event)? {
            debug!(
                root = %root.name,
                bytes = reader.buffer_position(),
                "Document received"
            );
            return Ok(root);
        }
        buf.clear();
    }
}
