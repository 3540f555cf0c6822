//! Per-connection request handling

use crate::pipeline::{Connection, Pipeline};
use crate::protocol::{Request, Response};
use crate::xml::{read_document, Schema};
use chaski_common::config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info};

/// Ingestion limits shared by all connections
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub max_message_size: u64,
    pub read_timeout: Duration,
    pub schema: Option<Schema>,
}

impl HandlerConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            max_message_size: config.max_message_size.as_u64(),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            schema: config.validate_schema.then(Schema::builtin),
        }
    }
}

/// Reads one request off a connection and runs it through the pipeline
pub struct ConnectionHandler {
    pipeline: Arc<Pipeline>,
    config: Arc<HandlerConfig>,
    peer_addr: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(pipeline: Arc<Pipeline>, config: Arc<HandlerConfig>, peer_addr: SocketAddr) -> Self {
        Self {
            pipeline,
            config,
            peer_addr,
        }
    }

    /// Handle the connection to completion; the stream is closed on return
    pub async fn handle<S>(self, stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let conn = Connection::new(self.peer_addr, writer);

        let read = timeout(
            self.config.read_timeout,
            read_document(reader, self.config.max_message_size),
        )
        .await;

        let document = match read {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => return reject(conn, format!("Bad xml: {}", e)).await,
            Err(_) => return reject(conn, "Timed out waiting for request".to_string()).await,
        };

        if let Some(schema) = &self.config.schema {
            if let Err(e) = schema.validate(&document) {
                return reject(conn, format!("Bad xml: {}", e)).await;
            }
        }

        let request = match Request::from_element(&document) {
            Ok(request) => request,
            Err(e) => return reject(conn, format!("Bad xml: {}", e)).await,
        };

        debug!(request = request.kind(), "Request accepted");
        self.pipeline.run(&document, request, conn).await
    }
}

/// Answer with a Fail result before the pipeline is entered
async fn reject(mut conn: Connection, reason: String) -> std::io::Result<()> {
    info!(reason = %reason, "Request rejected");
    conn.respond(&Response::fail(reason)).await?;
    conn.close().await
}
