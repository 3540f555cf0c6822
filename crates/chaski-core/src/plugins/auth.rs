//! Authentication plugin
//!
//! Requests with credentials come from users: the password is checked, fetches
//! may only name the user's own accounts, and submitted mail gets its senders
//! rewritten to the authenticated user. Mail without credentials comes from a
//! peer server, which may only send for the domains its address resolves to.
//!
//! The peer check trusts reverse DNS and is only as strong as it is.

use super::resolver::PeerResolver;
use super::users::UserDirectory;
use super::{local_accounts, required_param};
use crate::pipeline::{Connection, Plugin, PluginEnv, ProcessResult};
use crate::protocol::{Credentials, FetchRequest, Mail, Request};
use async_trait::async_trait;
use chaski_common::{Address, Result};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct AuthPlugin {
    users: UserDirectory,
    identity: String,
    resolver: Arc<dyn PeerResolver>,
}

impl AuthPlugin {
    pub fn new(users: UserDirectory, identity: impl Into<String>, resolver: Arc<dyn PeerResolver>) -> Self {
        Self {
            users,
            identity: identity.into(),
            resolver,
        }
    }

    /// Parameters: `userconf` (path of the user file)
    pub fn from_params(params: &HashMap<String, String>, env: &PluginEnv) -> Result<Self> {
        let path = required_param(params, "auth", "userconf")?;
        let users = UserDirectory::load(Path::new(path))?;
        Ok(Self::new(users, env.identity.clone(), Arc::clone(&env.resolver)))
    }

    fn check_credentials(&self, credentials: &Credentials) -> std::result::Result<(), String> {
        debug!(user = %credentials.username, "User tries to login");
        match self.users.verify(&credentials.username, &credentials.password) {
            Some(_) => Ok(()),
            None => Err(format!(
                "No such user \"{}\" or wrong password",
                credentials.username
            )),
        }
    }

    fn check_fetch(&self, fetch: &FetchRequest) -> std::result::Result<(), String> {
        self.check_credentials(&fetch.credentials)?;

        let owned = self
            .users
            .get(&fetch.credentials.username)
            .map(|user| fetch.accounts.iter().all(|a| user.owns(a)))
            .unwrap_or(false);
        if owned {
            Ok(())
        } else {
            Err("Some requested accounts do not exist or assigned to another user".to_string())
        }
    }

    fn check_recipients(&self, mail: &Mail) -> std::result::Result<(), String> {
        let unknown: Vec<String> = mail
            .messages
            .iter()
            .flat_map(|m| local_accounts(m, &self.identity))
            .filter(|account| !self.users.is_known_account(account))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            debug!(accounts = ?unknown, "Unknown local recipients");
            Err("Some recepients do not exist".to_string())
        }
    }

    /// Mail submitted by a user: qualify recipients, check them, rewrite senders
    fn user_mail(&self, mut mail: Mail) -> std::result::Result<Mail, String> {
        let username = match &mail.credentials {
            Some(credentials) => {
                self.check_credentials(credentials)?;
                credentials.username.clone()
            }
            None => return Err("Missing credentials".to_string()),
        };

        let qualify = |addresses: Vec<Address>| -> Vec<Address> {
            addresses
                .into_iter()
                .map(|a| a.qualified(&self.identity))
                .collect()
        };
        for message in &mut mail.messages {
            message.to = qualify(std::mem::take(&mut message.to));
            message.secret_to = qualify(std::mem::take(&mut message.secret_to));
        }

        self.check_recipients(&mail)?;

        let sender = Address::new(username, self.identity.clone());
        for message in &mut mail.messages {
            message.from = sender.clone();
        }

        Ok(mail)
    }

    /// Mail relayed by a peer: every sender domain must be one of the peer's names
    async fn peer_mail(&self, mail: Mail, ip: IpAddr) -> std::result::Result<Mail, String> {
        let names: Vec<String> = self
            .resolver
            .peer_names(ip)
            .await
            .into_iter()
            .map(|n| n.to_ascii_lowercase())
            .collect();

        let foreign: BTreeSet<String> = mail
            .messages
            .iter()
            .map(|m| m.from.domain.clone().unwrap_or_default())
            .filter(|domain| !names.contains(&domain.to_ascii_lowercase()))
            .collect();

        if !foreign.is_empty() {
            return Err(format!(
                "There are senders from third server(s): {:?}",
                foreign.into_iter().collect::<Vec<_>>()
            ));
        }

        self.check_recipients(&mail)?;
        Ok(mail)
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn process(&self, request: Request, conn: &mut Connection) -> ProcessResult {
        let result = match request {
            Request::Fetch(fetch) => self.check_fetch(&fetch).map(|_| Request::Fetch(fetch)),
            Request::Mail(mail) if mail.credentials.is_some() => {
                debug!("Mail from user");
                self.user_mail(mail).map(Request::Mail)
            }
            Request::Mail(mail) => {
                debug!(peer = %conn.peer_addr(), "Mail from another server");
                self.peer_mail(mail, conn.peer_addr().ip()).await.map(Request::Mail)
            }
        };

        match result {
            Ok(request) => ProcessResult::Ok(request),
            Err(reason) => ProcessResult::Fail(reason),
        }
    }
}
