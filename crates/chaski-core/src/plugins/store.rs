//! Local delivery into recipient mailboxes

use super::{local_accounts, required_param};
use crate::pipeline::{Connection, Plugin, PluginEnv, ProcessResult};
use crate::protocol::Request;
use async_trait::async_trait;
use chaski_common::config::MatchRule;
use chaski_common::Result;
use chaski_storage::{create_store, MailStore};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Stores every message once per content hash and links it into each local
/// recipient's mailbox. Blind recipients are left out of the stored copy.
pub struct StorePlugin {
    store: Box<dyn MailStore>,
    identity: String,
}

impl StorePlugin {
    pub fn new(store: Box<dyn MailStore>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
        }
    }

    /// Parameters: `base_dir`, optional `backend` (`hardlink` or `copy`)
    pub fn from_params(params: &HashMap<String, String>, env: &PluginEnv) -> Result<Self> {
        let base_dir = required_param(params, "store", "base_dir")?;
        let backend = params.get("backend").map(String::as_str).unwrap_or("hardlink");
        let store = create_store(backend, Path::new(base_dir))?;
        Ok(Self::new(store, env.identity.clone()))
    }
}

#[async_trait]
impl Plugin for StorePlugin {
    fn name(&self) -> &'static str {
        "store"
    }

    fn default_match(&self) -> MatchRule {
        MatchRule::Exists("/Mail".to_string())
    }

    async fn process(&self, request: Request, _conn: &mut Connection) -> ProcessResult {
        let mut mail = match request {
            Request::Mail(mail) => mail,
            other => return ProcessResult::Ok(other),
        };

        for message in &mut mail.messages {
            let accounts = local_accounts(message, &self.identity);
            if accounts.is_empty() {
                debug!(subject = %message.subject, "No local recipients, not storing");
                continue;
            }

            let secret_to = std::mem::take(&mut message.secret_to);
            let data = message.to_element().to_xml();
            let stored = self.store.store(&accounts, &data).await;
            message.secret_to = secret_to;

            match stored {
                Ok(name) => debug!(name = %name, accounts = ?accounts, "Message stored"),
                Err(e) => return ProcessResult::Fail(e.to_string()),
            }
        }

        ProcessResult::Ok(Request::Mail(mail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Chapter, Mail, Message};
    use crate::xml::parse;
    use chaski_common::Address;
    use chaski_storage::{FsMailStore, LinkMode};
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn message() -> Message {
        Message {
            from: Address::new("alice", "serverA"),
            to: vec![Address::new("bob", "serverA"), Address::new("carol", "serverB")],
            secret_to: vec![Address::new("dave", "serverA"), Address::new("erin", "serverB")],
            subject: "Greetings".to_string(),
            chapters: vec![Chapter {
                name: "body".to_string(),
                mime_type: "text/plain".to_string(),
                content: "hello <world> & friends".to_string(),
                encoding: None,
            }],
        }
    }

    fn plugin(dir: &TempDir) -> StorePlugin {
        StorePlugin::new(
            Box::new(FsMailStore::new(dir.path(), LinkMode::HardLink).unwrap()),
            "serverA",
        )
    }

    fn connection() -> Connection {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Connection::new(addr, tokio::io::sink())
    }

    #[tokio::test]
    async fn test_store_strips_and_restores_secret_to() {
        let dir = TempDir::new().unwrap();
        let request = Request::Mail(Mail {
            credentials: None,
            messages: vec![message()],
        });

        let result = plugin(&dir).process(request, &mut connection()).await;
        let ProcessResult::Ok(Request::Mail(mail)) = result else {
            panic!("expected success");
        };
        // Downstream plugins still see the blind recipients
        assert_eq!(mail.messages[0], message());

        let bob: Vec<_> = std::fs::read_dir(dir.path().join("bob")).unwrap().collect();
        let dave: Vec<_> = std::fs::read_dir(dir.path().join("dave")).unwrap().collect();
        assert_eq!(bob.len(), 1);
        assert_eq!(dave.len(), 1);
        assert!(!dir.path().join("carol").exists());

        let path = bob[0].as_ref().unwrap().path();
        let stored = Message::from_element(&parse(&std::fs::read(&path).unwrap()).unwrap()).unwrap();
        assert!(stored.secret_to.is_empty());
        assert_eq!(stored.chapters, message().chapters);

        let mut expected = message();
        expected.secret_to.clear();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            chaski_storage::content_name(&expected.to_element().to_xml())
        );
    }

    #[tokio::test]
    async fn test_remote_only_message_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut remote = message();
        remote.to.retain(|a| !a.is_local_to("serverA"));
        remote.secret_to.retain(|a| !a.is_local_to("serverA"));

        let request = Request::Mail(Mail {
            credentials: None,
            messages: vec![remote],
        });
        let result = plugin(&dir).process(request, &mut connection()).await;
        assert!(matches!(result, ProcessResult::Ok(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_mail() {
        let dir = TempDir::new().unwrap();
        let mut bad = message();
        bad.to = vec![Address::new("..", "serverA")];
        bad.secret_to.clear();

        let request = Request::Mail(Mail {
            credentials: None,
            messages: vec![bad],
        });
        match plugin(&dir).process(request, &mut connection()).await {
            ProcessResult::Fail(reason) => assert!(reason.contains("Invalid mailbox name")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_params() {
        let dir = TempDir::new().unwrap();
        let env = PluginEnv::for_tests("serverA");
        let mut params = HashMap::new();
        assert!(StorePlugin::from_params(&params, &env).is_err());

        params.insert("base_dir".to_string(), dir.path().display().to_string());
        assert!(StorePlugin::from_params(&params, &env).is_ok());
        params.insert("backend".to_string(), "tape".to_string());
        assert!(StorePlugin::from_params(&params, &env).is_err());
    }
}
