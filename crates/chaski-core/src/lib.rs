//! Chaski Core - XML message relay server
//!
//! This crate provides the wire protocol, the plugin pipeline, the built-in
//! plugins and the TCP server that ties them together.

pub mod pipeline;
pub mod plugins;
pub mod protocol;
pub mod server;
pub mod xml;

pub use pipeline::{Connection, Pipeline, PipelineOutcome, Plugin, PluginEnv, PluginRegistry, ProcessResult};
pub use protocol::{Mail, Message, Request, Response};
pub use server::ChaskiServer;
