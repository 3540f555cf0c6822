//! Mailbox storage

use async_trait::async_trait;
use chaski_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info};

/// Extension of every stored message file
pub const MESSAGE_EXT: &str = ".xml";

/// One stored message as seen from a single mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    /// Mailbox (account) the item was listed from
    pub mailbox: String,
    /// File name inside the mailbox
    pub name: String,
    /// Full path of the file
    pub path: PathBuf,
    /// Last modification time, used as the receive time
    pub modified: SystemTime,
}

/// Mailbox storage trait: store once, reference from N mailboxes
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Store `data` and make it visible in every mailbox; returns the stored name
    async fn store(&self, mailboxes: &[String], data: &[u8]) -> Result<String>;

    /// List the items of a mailbox, ordered by name. A missing mailbox is empty.
    async fn list(&self, mailbox: &str) -> Result<Vec<StoredItem>>;

    /// Read one item
    async fn read(&self, item: &StoredItem) -> Result<Vec<u8>>;

    /// Remove one item from its mailbox only
    async fn remove(&self, item: &StoredItem) -> Result<()>;
}

/// How additional mailboxes reference the first stored copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// `link(2)` into every other mailbox
    HardLink,
    /// Independent copy per mailbox
    Copy,
}

/// Filesystem mailbox store: `<base_dir>/<mailbox>/<md5>.xml`
pub struct FsMailStore {
    base_path: PathBuf,
    mode: LinkMode,
}

impl FsMailStore {
    /// Create a store rooted at `path`, creating the directory if needed
    pub fn new(path: &Path, mode: LinkMode) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), ?mode, "Initialized mailbox storage");

        Ok(Self {
            base_path: path.to_path_buf(),
            mode,
        })
    }

    /// Directory of a mailbox, refusing names that are not a single path component
    pub fn mailbox_dir(&self, mailbox: &str) -> Result<PathBuf> {
        if mailbox.is_empty()
            || mailbox == "."
            || mailbox.contains("..")
            || mailbox.contains('/')
            || mailbox.contains('\\')
            || mailbox.contains('\0')
        {
            return Err(Error::Storage(format!(
                "Invalid mailbox name: {:?}",
                mailbox
            )));
        }

        Ok(self.base_path.join(mailbox))
    }

    async fn ensure_dir(dir: &Path) -> Result<()> {
        match fs::create_dir(dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "Created mailbox");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to create mailbox {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// First free name in `dir`, prefixing `_` on collision.
    ///
    /// Check-then-write: two writers racing on the same name can still
    /// both pick it. Only the first mailbox is checked, so linking into a
    /// later mailbox that already holds the name fails.
    async fn free_name(dir: &Path, base: &str) -> Result<String> {
        let mut name = base.to_string();
        loop {
            let exists = fs::try_exists(dir.join(&name))
                .await
                .map_err(|e| Error::Storage(format!("Failed to check {}: {}", name, e)))?;
            if !exists {
                return Ok(name);
            }
            name.insert(0, '_');
        }
    }
}

/// Base file name for message content: hex MD5 plus extension
pub fn content_name(data: &[u8]) -> String {
    format!("{}{}", hex::encode(md5::compute(data).0), MESSAGE_EXT)
}

#[async_trait]
impl MailStore for FsMailStore {
    async fn store(&self, mailboxes: &[String], data: &[u8]) -> Result<String> {
        let mut dirs: Vec<PathBuf> = Vec::with_capacity(mailboxes.len());
        for mailbox in mailboxes {
            let dir = self.mailbox_dir(mailbox)?;
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        let (first, rest) = dirs
            .split_first()
            .ok_or_else(|| Error::Storage("No mailbox to store into".to_string()))?;

        for dir in &dirs {
            Self::ensure_dir(dir).await?;
        }

        let name = Self::free_name(first, &content_name(data)).await?;
        let original = first.join(&name);

        fs::write(&original, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", original.display(), e)))?;

        // No rollback: a failure here leaves the copies made so far in place.
        for dir in rest {
            let target = dir.join(&name);
            let result = match self.mode {
                LinkMode::HardLink => fs::hard_link(&original, &target).await,
                LinkMode::Copy => fs::copy(&original, &target).await.map(|_| ()),
            };
            result.map_err(|e| {
                Error::Storage(format!("Failed to link {}: {}", target.display(), e))
            })?;
        }

        debug!(name = %name, mailboxes = dirs.len(), size = data.len(), "Stored message");

        Ok(name)
    }

    async fn list(&self, mailbox: &str) -> Result<Vec<StoredItem>> {
        let dir = self.mailbox_dir(mailbox)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(mailbox = %mailbox, "Mailbox does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to list mailbox {}: {}",
                    mailbox, e
                )))
            }
        };

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("Failed to list mailbox {}: {}", mailbox, e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| Error::Storage(format!("Failed to stat {:?}: {}", entry.path(), e)))?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata
                .modified()
                .map_err(|e| Error::Storage(format!("Failed to stat {:?}: {}", entry.path(), e)))?;

            items.push(StoredItem {
                mailbox: mailbox.to_string(),
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                modified,
            });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn read(&self, item: &StoredItem) -> Result<Vec<u8>> {
        let data = fs::read(&item.path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", item.path.display(), e)))?;

        debug!(path = %item.path.display(), size = data.len(), "Read message");

        Ok(data)
    }

    async fn remove(&self, item: &StoredItem) -> Result<()> {
        fs::remove_file(&item.path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete {}: {}", item.path.display(), e)))?;

        debug!(path = %item.path.display(), "Deleted message");

        Ok(())
    }
}

/// Create a mailbox store from a backend name
pub fn create_store(backend: &str, base_dir: &Path) -> Result<Box<dyn MailStore>> {
    match backend {
        "hardlink" | "fs" => Ok(Box::new(FsMailStore::new(base_dir, LinkMode::HardLink)?)),
        "copy" => Ok(Box::new(FsMailStore::new(base_dir, LinkMode::Copy)?)),
        other => Err(Error::Config(format!(
            "Unsupported storage backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn boxes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_store_once_link_many() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::HardLink).unwrap();

        let data = b"<chaski:Message/>";
        let name = store.store(&boxes(&["a", "b", "c"]), data).await.unwrap();
        assert_eq!(name, content_name(data));

        for mailbox in ["a", "b", "c"] {
            let items = store.list(mailbox).await.unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].name, name);
            assert_eq!(store.read(&items[0]).await.unwrap(), data);
        }

        // Removing one reference leaves the others intact
        let a_items = store.list("a").await.unwrap();
        store.remove(&a_items[0]).await.unwrap();
        assert!(store.list("a").await.unwrap().is_empty());
        assert_eq!(store.list("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collision_prefixes_underscore() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::HardLink).unwrap();

        let data = b"same content";
        let first = store.store(&boxes(&["bob"]), data).await.unwrap();
        let second = store.store(&boxes(&["bob"]), data).await.unwrap();
        let third = store.store(&boxes(&["bob"]), data).await.unwrap();

        assert_eq!(second, format!("_{}", first));
        assert_eq!(third, format!("__{}", first));
        assert_eq!(store.list("bob").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_collision_in_later_mailbox_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::HardLink).unwrap();

        let data = b"same content";
        store.store(&boxes(&["carol"]), data).await.unwrap();

        let err = store.store(&boxes(&["bob", "carol"]), data).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "{}", err);

        // No rollback: the first mailbox keeps its copy
        assert_eq!(store.list("bob").await.unwrap().len(), 1);
        assert_eq!(store.list("carol").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_copy_mode_and_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::Copy).unwrap();

        store
            .store(&boxes(&["x", "y", "x"]), b"payload")
            .await
            .unwrap();

        assert_eq!(store.list("x").await.unwrap().len(), 1);
        assert_eq!(store.list("y").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_mailbox_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::HardLink).unwrap();
        assert!(store.list("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_mailbox_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailStore::new(temp_dir.path(), LinkMode::HardLink).unwrap();

        assert!(store.store(&boxes(&["../etc"]), b"evil").await.is_err());
        assert!(store.store(&boxes(&["a/b"]), b"evil").await.is_err());
        assert!(store.store(&boxes(&[""]), b"evil").await.is_err());
        assert!(store.store(&[], b"nothing").await.is_err());
        assert!(store.list("..").await.is_err());
    }

    #[test]
    fn test_create_store_backends() {
        let temp_dir = TempDir::new().unwrap();
        assert!(create_store("hardlink", temp_dir.path()).is_ok());
        assert!(create_store("copy", temp_dir.path()).is_ok());
        assert!(create_store("s3", temp_dir.path()).is_err());
    }
}
