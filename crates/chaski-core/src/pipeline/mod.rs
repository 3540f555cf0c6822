//! Plugin pipeline
//!
//! Plugins whose match predicate holds against the incoming document are
//! selected once, up front, and then run strictly in configured order. Each
//! step takes ownership of the request and hands it back on success; the
//! first refusal ends the run.

mod registry;

pub use registry::{PluginEnv, PluginFactory, PluginRegistry};

use crate::protocol::{Request, Response};
use crate::xml::{Element, PathExpr};
use async_trait::async_trait;
use chaski_common::config::MatchRule;
use chaski_common::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Outcome of one plugin step
#[derive(Debug)]
pub enum ProcessResult {
    /// Continue with the (possibly rewritten) request
    Ok(Request),
    /// Stop the pipeline with this reason
    Fail(String),
}

/// Write side of a client connection, handed to every plugin
pub struct Connection {
    peer_addr: SocketAddr,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    responded: bool,
}

impl Connection {
    pub fn new<W>(peer_addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer_addr,
            writer: Box::new(writer),
            responded: false,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether a response was already written
    pub fn has_responded(&self) -> bool {
        self.responded
    }

    /// Write a complete response document.
    ///
    /// After this the pipeline no longer writes its own Success envelope.
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.responded = true;
        self.writer.write_all(data).await?;
        self.writer.flush().await
    }

    pub async fn respond(&mut self, response: &Response) -> std::io::Result<()> {
        self.send(&response.to_xml()).await
    }

    pub(crate) async fn close(mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// A processing stage of the pipeline
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registry name, used in logs and failure reports
    fn name(&self) -> &'static str;

    /// Predicate used when the configuration does not override it
    fn default_match(&self) -> MatchRule {
        MatchRule::Any
    }

    async fn process(&self, request: Request, conn: &mut Connection) -> ProcessResult;
}

/// Compiled match predicate
#[derive(Debug, Clone)]
pub enum Matcher {
    Any,
    Exists(PathExpr),
    Absent(PathExpr),
}

impl Matcher {
    pub fn compile(rule: &MatchRule) -> Result<Self> {
        Ok(match rule {
            MatchRule::Any => Matcher::Any,
            MatchRule::Exists(path) => Matcher::Exists(PathExpr::parse(path)?),
            MatchRule::Absent(path) => Matcher::Absent(PathExpr::parse(path)?),
        })
    }

    pub fn matches(&self, document: &Element) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exists(path) => path.exists(document),
            Matcher::Absent(path) => !path.exists(document),
        }
    }
}

struct Stage {
    plugin: Arc<dyn Plugin>,
    matcher: Matcher,
}

/// How a pipeline run ended
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Request),
    Refused { plugin: &'static str, reason: String },
}

/// Ordered plugin chain, immutable once the server runs
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; `rule` overrides its default predicate
    pub fn push(&mut self, plugin: Arc<dyn Plugin>, rule: Option<&MatchRule>) -> Result<()> {
        let matcher = match rule {
            Some(rule) => Matcher::compile(rule)?,
            None => Matcher::compile(&plugin.default_match())?,
        };
        self.stages.push(Stage { plugin, matcher });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the configured plugins, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.plugin.name()).collect()
    }

    /// Plugins whose predicate holds against `document`, in configured order
    pub fn select(&self, document: &Element) -> Vec<Arc<dyn Plugin>> {
        self.stages
            .iter()
            .filter(|s| s.matcher.matches(document))
            .map(|s| Arc::clone(&s.plugin))
            .collect()
    }

    /// Run the selected plugins until one refuses.
    ///
    /// Selection uses `original` only; rewrites made by earlier plugins do not
    /// change which later plugins run.
    pub async fn execute(
        &self,
        original: &Element,
        request: Request,
        conn: &mut Connection,
    ) -> PipelineOutcome {
        let selected = self.select(original);
        debug!(
            plugins = ?selected.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Selected plugins"
        );

        let mut request = request;
        for plugin in selected {
            match plugin.process(request, conn).await {
                ProcessResult::Ok(next) => request = next,
                ProcessResult::Fail(reason) => {
                    info!(plugin = plugin.name(), reason = %reason, "Request refused");
                    return PipelineOutcome::Refused {
                        plugin: plugin.name(),
                        reason,
                    };
                }
            }
        }

        PipelineOutcome::Completed(request)
    }

    /// Execute, answer the client unless a plugin already did, and close
    pub async fn run(
        &self,
        original: &Element,
        request: Request,
        mut conn: Connection,
    ) -> std::io::Result<()> {
        let response = match self.execute(original, request, &mut conn).await {
            PipelineOutcome::Completed(_) => Response::success(),
            PipelineOutcome::Refused { reason, .. } => Response::fail(reason),
        };

        if !conn.has_responded() {
            conn.respond(&response).await?;
        }
        conn.close().await
    }
}
