//! Diagnostic plugins

use super::required_param;
use crate::pipeline::{Connection, Plugin, PluginEnv, ProcessResult};
use crate::protocol::Request;
use async_trait::async_trait;
use chaski_common::{Error, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Logs the serialized size of every request
#[derive(Debug, Default)]
pub struct SizePlugin;

impl SizePlugin {
    pub fn from_params(_params: &HashMap<String, String>, _env: &PluginEnv) -> Result<Self> {
        Ok(SizePlugin)
    }
}

#[async_trait]
impl Plugin for SizePlugin {
    fn name(&self) -> &'static str {
        "size"
    }

    async fn process(&self, request: Request, _conn: &mut Connection) -> ProcessResult {
        info!("Mail size is {}", request.to_xml().len());
        ProcessResult::Ok(request)
    }
}

/// Appends every request to a file, for testing
pub struct DumpPlugin {
    file: Mutex<File>,
}

impl DumpPlugin {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Config(format!("Failed to open dump file {}: {}", path.display(), e)))?;

        Ok(Self {
            file: Mutex::new(File::from_std(file)),
        })
    }

    /// Parameters: `fname`
    pub fn from_params(params: &HashMap<String, String>, _env: &PluginEnv) -> Result<Self> {
        Self::open(Path::new(required_param(params, "dump", "fname")?))
    }
}

#[async_trait]
impl Plugin for DumpPlugin {
    fn name(&self) -> &'static str {
        "dump"
    }

    async fn process(&self, request: Request, _conn: &mut Connection) -> ProcessResult {
        let data = request.to_xml();
        let mut file = self.file.lock().await;

        let written = async {
            file.write_all(&data).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        match written {
            Ok(()) => ProcessResult::Ok(request),
            Err(e) => ProcessResult::Fail(format!("Failed to dump mail: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Credentials, FetchConditions, FetchRequest};
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn request() -> Request {
        Request::Fetch(FetchRequest {
            credentials: Credentials::new("bob", "pw"),
            accounts: vec!["bob".to_string()],
            conditions: FetchConditions::default(),
        })
    }

    fn connection() -> Connection {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Connection::new(addr, tokio::io::sink())
    }

    #[tokio::test]
    async fn test_size_passes_through() {
        let result = SizePlugin.process(request(), &mut connection()).await;
        assert!(matches!(result, ProcessResult::Ok(r) if r == request()));
    }

    #[tokio::test]
    async fn test_dump_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.xml");
        let plugin = DumpPlugin::open(&path).unwrap();

        for _ in 0..2 {
            let result = plugin.process(request(), &mut connection()).await;
            assert!(matches!(result, ProcessResult::Ok(_)));
        }

        let dumped = std::fs::read_to_string(&path).unwrap();
        let line = String::from_utf8(request().to_xml()).unwrap();
        assert_eq!(dumped, format!("{}\n{}\n", line, line));
    }

    #[test]
    fn test_dump_requires_fname() {
        let env = PluginEnv::for_tests("serverA");
        assert!(DumpPlugin::from_params(&HashMap::new(), &env).is_err());
    }
}
