//! Forwarding to peer servers

use super::parsed_param;
use super::resolver::PeerTable;
use crate::pipeline::{Connection, Plugin, PluginEnv, ProcessResult};
use crate::protocol::{Mail, Message, Request, Response};
use crate::xml;
use async_trait::async_trait;
use chaski_common::config::MatchRule;
use chaski_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Upper bound for a peer's reply
const MAX_REPLY_SIZE: u64 = 64 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Sends user-submitted mail on to the servers owning the non-local recipients.
///
/// Only mail carrying credentials is relayed, so mail arriving from a peer is
/// never forwarded again. Each destination gets one connection with one `Mail`
/// envelope. Delivery runs in the background and never fails the request.
pub struct RelayPlugin {
    identity: String,
    port: u16,
    timeout: Duration,
    peers: Arc<PeerTable>,
}

impl RelayPlugin {
    pub fn new(identity: impl Into<String>, port: u16, timeout: Duration, peers: Arc<PeerTable>) -> Self {
        Self {
            identity: identity.into(),
            port,
            timeout,
            peers,
        }
    }

    /// Parameters: optional `port` (default: own listening port), optional `timeout_secs`
    pub fn from_params(params: &HashMap<String, String>, env: &PluginEnv) -> Result<Self> {
        let port = parsed_param(params, "relay", "port")?.unwrap_or(env.port);
        let timeout_secs = parsed_param(params, "relay", "timeout_secs")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        Ok(Self::new(
            env.identity.clone(),
            port,
            Duration::from_secs(timeout_secs),
            Arc::clone(&env.peers),
        ))
    }

    /// Messages per destination domain.
    ///
    /// A message goes to every remote domain among its recipients. Each copy
    /// keeps only the blind recipients of its own destination.
    pub fn batches(&self, mail: &Mail) -> BTreeMap<String, Vec<Message>> {
        let mut batches: BTreeMap<String, Vec<Message>> = BTreeMap::new();

        for message in &mail.messages {
            let mut domains: Vec<String> = message
                .recipients()
                .filter_map(|a| a.domain.as_deref())
                .filter(|d| !d.eq_ignore_ascii_case(&self.identity))
                .map(str::to_ascii_lowercase)
                .collect();
            domains.sort();
            domains.dedup();

            for domain in domains {
                let mut copy = message.clone();
                copy.secret_to.retain(|a| {
                    a.domain
                        .as_deref()
                        .map(|d| d.eq_ignore_ascii_case(&domain))
                        .unwrap_or(false)
                });
                batches.entry(domain).or_default().push(copy);
            }
        }

        batches
    }

    /// Start one delivery per destination domain
    pub fn dispatch(&self, mail: &Mail) -> JoinSet<(String, Result<()>)> {
        let mut legs = JoinSet::new();

        for (domain, messages) in self.batches(mail) {
            let target = self.peers.target(&domain, self.port);
            let payload = Mail {
                credentials: None,
                messages,
            }
            .to_xml();
            let limit = self.timeout;

            debug!(domain = %domain, target = %target, size = payload.len(), "Relaying mail");
            legs.spawn(async move {
                let result = match timeout(limit, deliver(&target, &payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Transport(format!("Timed out relaying to {}", target))),
                };
                (domain, result)
            });
        }

        legs
    }
}

async fn deliver(target: &str, payload: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect(target)
        .await
        .map_err(|e| Error::Transport(format!("Failed to connect to {}: {}", target, e)))?;
    stream.write_all(payload).await?;
    stream.flush().await?;

    let reply = xml::read_document(&mut stream, MAX_REPLY_SIZE)
        .await
        .map_err(|e| Error::Transport(format!("No reply from {}: {}", target, e)))?;
    let response = Response::from_element(&reply)?;
    if !response.is_success() {
        warn!(target = %target, reason = %response.description, "Peer refused relayed mail");
    }

    stream.shutdown().await?;
    Ok(())
}

/// Log the outcome of every leg
async fn reap(mut legs: JoinSet<(String, Result<()>)>) {
    while let Some(joined) = legs.join_next().await {
        match joined {
            Ok((domain, Ok(()))) => info!(domain = %domain, "Relayed mail"),
            Ok((domain, Err(e))) => error!(domain = %domain, code = e.code(), error = %e, "Relay failed"),
            Err(e) => error!(error = %e, "Relay task aborted"),
        }
    }
}

#[async_trait]
impl Plugin for RelayPlugin {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn default_match(&self) -> MatchRule {
        MatchRule::Exists("Credentials".to_string())
    }

    async fn process(&self, request: Request, _conn: &mut Connection) -> ProcessResult {
        if let Request::Mail(mail) = &request {
            if mail.credentials.is_some() {
                let legs = self.dispatch(mail);
                if !legs.is_empty() {
                    tokio::spawn(reap(legs));
                }
            }
        }

        ProcessResult::Ok(request)
    }
}
