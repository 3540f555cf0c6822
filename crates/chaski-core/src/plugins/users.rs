//! Flat-file user directory
//!
//! One user per line: `username, passwordHash, account1, account2, ...`.
//! Lines with fewer than two fields are ignored.

use chaski_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// A user and the mailbox accounts it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub accounts: HashSet<String>,
}

impl UserRecord {
    pub fn owns(&self, account: &str) -> bool {
        self.accounts.contains(account)
    }
}

/// Unsalted MD5 of the password, lowercase hex
pub fn password_digest(password: &str) -> String {
    hex::encode(md5::compute(password.as_bytes()).0)
}

/// Immutable set of users, loaded once
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserRecord>,
    accounts: HashSet<String>,
}

impl UserDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read user file {}: {}", path.display(), e))
        })?;
        let directory = Self::parse(&data);
        debug!(path = %path.display(), users = directory.len(), "Loaded users");
        Ok(directory)
    }

    pub fn parse(data: &str) -> Self {
        let mut directory = Self::default();

        for line in data.lines() {
            let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
            let [username, password_hash, accounts @ ..] = tokens.as_slice() else {
                continue;
            };
            if username.is_empty() {
                continue;
            }

            let accounts: HashSet<String> = accounts
                .iter()
                .filter(|a| !a.is_empty())
                .map(|a| a.to_string())
                .collect();
            directory.accounts.extend(accounts.iter().cloned());
            directory.users.insert(
                username.to_string(),
                UserRecord {
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    accounts,
                },
            );
        }

        directory
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }

    /// The user, if it exists and `password` digests to its stored hash
    pub fn verify(&self, username: &str, password: &str) -> Option<&UserRecord> {
        self.users
            .get(username)
            .filter(|user| user.password_hash.eq_ignore_ascii_case(&password_digest(password)))
    }

    /// Whether any user owns `account`
    pub fn is_known_account(&self, account: &str) -> bool {
        self.accounts.contains(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_password_digest() {
        assert_eq!(password_digest("secret"), "5ebe2294ecd0e0f08eab7690d2a6ee69");
    }

    #[test]
    fn test_parse_users() {
        let directory = UserDirectory::parse(
            "alice, 5ebe2294ecd0e0f08eab7690d2a6ee69, alice, ally\n\
             \n\
             bob,5EBE2294ECD0E0F08EAB7690D2A6EE69,bob,\n\
             loner\n\
             nobox, 0cc175b9c0f1b6a831c399e269772661\n",
        );

        assert_eq!(directory.len(), 3);
        assert!(directory.get("loner").is_none());
        assert!(directory.get("nobox").unwrap().accounts.is_empty());

        let alice = directory.get("alice").unwrap();
        assert!(alice.owns("ally"));
        assert!(!alice.owns("bob"));

        assert!(directory.is_known_account("bob"));
        assert!(directory.is_known_account("ally"));
        assert!(!directory.is_known_account(""));
        assert!(!directory.is_known_account("carol"));
    }

    #[test]
    fn test_verify() {
        let directory = UserDirectory::parse(
            "alice, 5ebe2294ecd0e0f08eab7690d2a6ee69, alice\n\
             bob, 5EBE2294ECD0E0F08EAB7690D2A6EE69, bob",
        );

        assert!(directory.verify("alice", "secret").is_some());
        assert!(directory.verify("bob", "secret").is_some());
        assert!(directory.verify("alice", "wrong").is_none());
        assert!(directory.verify("carol", "secret").is_none());
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice, {}, alice", password_digest("pw")).unwrap();

        let directory = UserDirectory::load(file.path()).unwrap();
        assert!(directory.verify("alice", "pw").is_some());
        assert!(UserDirectory::load(Path::new("/nonexistent/users")).is_err());
    }
}
