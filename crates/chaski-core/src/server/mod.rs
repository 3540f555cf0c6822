//! Chaski server: listener and connection handling

mod handler;
mod listener;


pub use handler::{ConnectionHandler, HandlerConfig};
pub use listener::ChaskiServer;
