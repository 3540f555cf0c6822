//! Retrieval of stored messages

use super::required_param;
use crate::pipeline::{Connection, Plugin, PluginEnv, ProcessResult};
use crate::protocol::{FetchRequest, Mail, Message, Request};
use crate::xml;
use async_trait::async_trait;
use chaski_common::config::MatchRule;
use chaski_common::{Error, Result};
use chaski_storage::{create_store, MailStore, StoredItem};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error};

/// Answers a Fetch with a `Mail` envelope of the matching stored messages.
///
/// The envelope is the response; no `Result` follows it. Unreadable files
/// are logged and skipped, never failing the fetch.
pub struct FetchPlugin {
    store: Box<dyn MailStore>,
}

impl FetchPlugin {
    pub fn new(store: Box<dyn MailStore>) -> Self {
        Self { store }
    }

    /// Parameters: `base_dir`, optional `backend`
    pub fn from_params(params: &HashMap<String, String>, _env: &PluginEnv) -> Result<Self> {
        let base_dir = required_param(params, "fetch", "base_dir")?;
        let backend = params.get("backend").map(String::as_str).unwrap_or("hardlink");
        Ok(Self::new(create_store(backend, Path::new(base_dir))?))
    }

    async fn load(&self, item: &StoredItem, only_headers: bool) -> Result<Message> {
        let data = self.store.read(item).await?;
        let element = xml::parse(&data)
            .map_err(|e| Error::Storage(format!("{}: {}", item.path.display(), e)))?;
        if element.name != "Message" {
            return Err(Error::Storage(format!(
                "{}: unexpected root {}",
                item.path.display(),
                element.name
            )));
        }

        let mut message = Message::from_element(&element)?;
        if only_headers {
            message.chapters.clear();
        }
        Ok(message)
    }

    /// Collect the matching messages with the items they came from
    async fn collect(&self, fetch: &FetchRequest) -> Vec<(StoredItem, Message)> {
        let conditions = &fetch.conditions;
        let mut found = Vec::new();

        for account in &fetch.accounts {
            let items = match self.store.list(account).await {
                Ok(items) => items,
                Err(e) => {
                    error!(account = %account, error = %e, "Failed to list mailbox");
                    continue;
                }
            };

            for item in items {
                let received = DateTime::<Local>::from(item.modified).date_naive();
                if !conditions.accepts(received) {
                    continue;
                }

                match self.load(&item, conditions.only_headers).await {
                    Ok(message) => found.push((item, message)),
                    Err(e) => error!(error = %e, "Failed to fetch message"),
                }
            }
        }

        found
    }
}

#[async_trait]
impl Plugin for FetchPlugin {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn default_match(&self) -> MatchRule {
        MatchRule::Exists("/Fetch".to_string())
    }

    async fn process(&self, request: Request, conn: &mut Connection) -> ProcessResult {
        let fetch = match request {
            Request::Fetch(fetch) => fetch,
            other => return ProcessResult::Ok(other),
        };

        let (items, messages): (Vec<_>, Vec<_>) = self.collect(&fetch).await.into_iter().unzip();
        debug!(count = messages.len(), accounts = ?fetch.accounts, "Sending fetched messages");

        let envelope = Mail {
            credentials: None,
            messages,
        };
        if let Err(e) = conn.send(&envelope.to_xml()).await {
            // Nothing was delivered, so nothing is removed
            return ProcessResult::Fail(format!("Failed to send fetched mail: {}", e));
        }

        if fetch.conditions.remove_after {
            for item in &items {
                if let Err(e) = self.store.remove(item).await {
                    error!(error = %e, "Failed to remove fetched message");
                }
            }
        }

        ProcessResult::Ok(Request::Fetch(fetch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Chapter, Credentials, FetchConditions};
    use chaski_common::Address;
    use chaski_storage::{FsMailStore, LinkMode};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn message(subject: &str) -> Message {
        Message {
            from: Address::new("alice", "serverA"),
            to: vec![Address::new("bob", "serverA")],
            secret_to: vec![],
            subject: subject.to_string(),
            chapters: vec![Chapter {
                name: "body".to_string(),
                mime_type: "application/octet-stream".to_string(),
                content: "  AAEC\nAwQF  ".to_string(),
                encoding: Some("base64".to_string()),
            }],
        }
    }

    fn store(dir: &TempDir) -> FsMailStore {
        FsMailStore::new(dir.path(), LinkMode::HardLink).unwrap()
    }

    fn request(accounts: &[&str], conditions: FetchConditions) -> Request {
        Request::Fetch(FetchRequest {
            credentials: Credentials::new("bob", "pw"),
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            conditions,
        })
    }

    async fn run(plugin: &FetchPlugin, request: Request) -> (ProcessResult, Mail) {
        let (ours, mut theirs) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let mut conn = Connection::new(addr, ours);

        let result = plugin.process(request, &mut conn).await;
        assert!(conn.has_responded());
        drop(conn);

        let mut reply = Vec::new();
        theirs.read_to_end(&mut reply).await.unwrap();
        let mail = Mail::from_element(&xml::parse(&reply).unwrap()).unwrap();
        (result, mail)
    }

    #[tokio::test]
    async fn test_fetch_whole_and_remove() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let original = message("one");
        fs.store(&["bob".to_string(), "bobby".to_string()], &original.to_element().to_xml())
            .await
            .unwrap();

        let plugin = FetchPlugin::new(Box::new(store(&dir)));
        let conditions = FetchConditions {
            remove_after: true,
            ..Default::default()
        };
        let (result, mail) = run(&plugin, request(&["bob"], conditions)).await;

        assert!(matches!(result, ProcessResult::Ok(_)));
        assert_eq!(mail.messages, vec![original]);
        assert!(fs.list("bob").await.unwrap().is_empty());
        // Other references survive
        assert_eq!(fs.list("bobby").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_headers_only_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        let data = message("dup").to_element().to_xml();
        fs.store(&["bob".to_string()], &data).await.unwrap();
        fs.store(&["bob".to_string()], &data).await.unwrap();

        let plugin = FetchPlugin::new(Box::new(store(&dir)));
        let conditions = FetchConditions {
            only_headers: true,
            ..Default::default()
        };
        let (_, mail) = run(&plugin, request(&["bob"], conditions)).await;

        assert_eq!(mail.messages.len(), 2);
        assert!(mail.messages.iter().all(|m| m.chapters.is_empty()));
        assert_eq!(mail.messages[0].subject, "dup");
        // Nothing removed without removeAfter
        assert_eq!(fs.list("bob").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_skips_broken_files_and_dates() {
        let dir = TempDir::new().unwrap();
        let fs = store(&dir);
        fs.store(&["bob".to_string()], &message("good").to_element().to_xml())
            .await
            .unwrap();
        std::fs::write(dir.path().join("bob").join("broken.xml"), b"<chaski:Message>").unwrap();

        let plugin = FetchPlugin::new(Box::new(store(&dir)));
        let conditions = FetchConditions {
            remove_after: true,
            ..Default::default()
        };
        let (result, mail) = run(&plugin, request(&["bob", "nobody"], conditions)).await;
        assert!(matches!(result, ProcessResult::Ok(_)));
        assert_eq!(mail.messages.len(), 1);
        assert_eq!(mail.messages[0].subject, "good");

        // The broken file is neither returned nor removed
        let left = fs.list("bob").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "broken.xml");

        // Everything stored today is outside a window ending yesterday
        fs.store(&["bob".to_string()], &message("new").to_element().to_xml())
            .await
            .unwrap();
        let yesterday = Local::now().date_naive() - Duration::days(1);
        let conditions = FetchConditions {
            max_date: Some(yesterday),
            ..Default::default()
        };
        let (_, mail) = run(&plugin, request(&["bob"], conditions)).await;
        assert!(mail.messages.is_empty());
    }
}
