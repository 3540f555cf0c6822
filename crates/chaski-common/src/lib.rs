//! Chaski Common - Shared types and utilities
//!
//! This crate provides configuration, the error type and the small
//! value types shared by every Chaski component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{Address, ByteSize};
