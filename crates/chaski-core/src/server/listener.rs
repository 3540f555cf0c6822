//! TCP listener

use super::handler::{ConnectionHandler, HandlerConfig};
use crate::pipeline::Pipeline;
use crate::protocol::Response;
use anyhow::Result;
use chaski_common::config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Chaski server: one task per connection, bounded by a semaphore
pub struct ChaskiServer {
    bind_address: String,
    port: u16,
    pipeline: Arc<Pipeline>,
    handler_config: Arc<HandlerConfig>,
    connection_semaphore: Arc<Semaphore>,
}

impl ChaskiServer {
    pub fn new(config: &ServerConfig, pipeline: Pipeline) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            pipeline: Arc::new(pipeline),
            handler_config: Arc::new(HandlerConfig::from_server_config(config)),
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Chaski server listening on {}", addr);
        Ok(listener)
    }

    /// Bind and serve until the task is dropped
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let span = tracing::info_span!("connection", id = %Uuid::new_v4(), peer = %peer_addr);

        let permit = match self.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Max connections reached, rejecting {}", peer_addr);
                tokio::spawn(refuse_busy(stream).instrument(span));
                return;
            }
        };

        let handler = ConnectionHandler::new(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.handler_config),
            peer_addr,
        );

        tokio::spawn(
            async move {
                debug!("Connection accepted");
                if let Err(e) = handler.handle(stream).await {
                    error!("Session error from {}: {}", peer_addr, e);
                }
                drop(permit);
            }
            .instrument(span),
        );
    }
}

async fn refuse_busy(mut stream: TcpStream) {
    let response = Response::fail("Server busy").to_xml();
    let result = async {
        stream.write_all(&response).await?;
        stream.shutdown().await
    }
    .await;

    if let Err(e) = result {
        debug!("Failed to send busy response: {}", e);
    }
}
