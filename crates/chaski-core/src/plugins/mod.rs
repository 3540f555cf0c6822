//! Built-in plugins
//!
//! - `auth`: credential and peer checks, sender rewrite
//! - `store`: writes messages into local mailboxes
//! - `fetch`: answers Fetch requests from the mailboxes
//! - `relay`: forwards messages to peer servers
//! - `size`, `dump`: diagnostics

mod auth;
mod diagnostics;
mod fetch;
mod relay;
mod resolver;
mod store;
mod users;

pub use auth::AuthPlugin;
pub use diagnostics::{DumpPlugin, SizePlugin};
pub use fetch::FetchPlugin;
pub use relay::RelayPlugin;
pub use resolver::{DnsPeerResolver, PeerResolver, PeerTable};
pub use store::StorePlugin;
pub use users::{password_digest, UserDirectory, UserRecord};

use crate::protocol::Message;
use chaski_common::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// Mailbox names of the recipients of `message` that live on this server.
///
/// Unqualified recipients count as local. Order is preserved, duplicates
/// dropped.
pub fn local_accounts(message: &Message, identity: &str) -> Vec<String> {
    let mut accounts: Vec<String> = Vec::new();
    for address in message.recipients() {
        let local = address.domain.is_none() || address.is_local_to(identity);
        if local && !accounts.contains(&address.local) {
            accounts.push(address.local.clone());
        }
    }
    accounts
}

fn required_param<'a>(params: &'a HashMap<String, String>, plugin: &str, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("Plugin {} requires parameter {}", plugin, key)))
}

fn parsed_param<T>(params: &HashMap<String, String>, plugin: &str, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    params
        .get(key)
        .map(|v| {
            v.parse().map_err(|e| {
                Error::Config(format!("Plugin {} has invalid {} {:?}: {}", plugin, key, v, e))
            })
        })
        .transpose()
}
