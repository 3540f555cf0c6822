//! Chaski Storage - Mailbox storage abstraction
//!
//! Messages are stored once and referenced from every recipient mailbox.
//! The filesystem backend does this with hard links, or with plain copies
//! where hard links are not available.

pub mod mailbox;

pub use mailbox::{create_store, content_name, FsMailStore, LinkMode, MailStore, StoredItem};
