//! Closed plugin registry
//!
//! Plugins are built from `[[plugins]]` entries by kind name. Only the kinds
//! registered here exist; nothing is loaded at runtime.

use super::{Pipeline, Plugin};
use crate::plugins::{
    AuthPlugin, DnsPeerResolver, DumpPlugin, FetchPlugin, PeerResolver, PeerTable, RelayPlugin,
    SizePlugin, StorePlugin,
};
use chaski_common::config::PluginSpec;
use chaski_common::{Config, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Server-wide facts every plugin may need at construction
#[derive(Clone)]
pub struct PluginEnv {
    pub identity: String,
    pub port: u16,
    pub peers: Arc<PeerTable>,
    pub resolver: Arc<dyn PeerResolver>,
}

impl PluginEnv {
    /// Environment with the DNS-backed peer resolver
    pub fn from_config(config: &Config) -> Self {
        let peers = PeerTable::new(&config.peers);
        Self {
            identity: config.server.identity.clone(),
            port: config.server.port,
            resolver: Arc::new(DnsPeerResolver::new(peers.clone())),
            peers: Arc::new(peers),
        }
    }

    /// Environment whose peer names come from the static table only
    pub fn with_static_peers(identity: impl Into<String>, port: u16, peers: &HashMap<String, String>) -> Self {
        let peers = Arc::new(PeerTable::new(peers));
        Self {
            identity: identity.into(),
            port,
            resolver: Arc::clone(&peers) as Arc<dyn PeerResolver>,
            peers,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(identity: &str) -> Self {
        Self::with_static_peers(identity, chaski_common::config::DEFAULT_PORT, &HashMap::new())
    }
}

/// Builds a plugin from its resolved parameters
pub type PluginFactory = fn(&HashMap<String, String>, &PluginEnv) -> Result<Arc<dyn Plugin>>;

pub struct PluginRegistry {
    factories: HashMap<&'static str, PluginFactory>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in plugin
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("auth", |p, env| Ok(Arc::new(AuthPlugin::from_params(p, env)?)));
        registry.register("store", |p, env| Ok(Arc::new(StorePlugin::from_params(p, env)?)));
        registry.register("fetch", |p, env| Ok(Arc::new(FetchPlugin::from_params(p, env)?)));
        registry.register("relay", |p, env| Ok(Arc::new(RelayPlugin::from_params(p, env)?)));
        registry.register("size", |p, env| Ok(Arc::new(SizePlugin::from_params(p, env)?)));
        registry.register("dump", |p, env| Ok(Arc::new(DumpPlugin::from_params(p, env)?)));
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: PluginFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn build(&self, spec: &PluginSpec, env: &PluginEnv) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(spec.kind.trim())
            .ok_or_else(|| Error::Config(format!("Unknown plugin kind: {}", spec.kind)))?;
        factory(&spec.resolved_params(), env)
    }

    /// Build the configured chain, in order
    pub fn build_pipeline(&self, specs: &[PluginSpec], env: &PluginEnv) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new();
        for spec in specs {
            let plugin = self.build(spec, env)?;
            pipeline.push(plugin, spec.match_rule.as_ref())?;
        }

        info!(plugins = ?pipeline.names(), "Plugin pipeline ready");
        Ok(pipeline)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::password_digest;
    use chaski_common::config::MatchRule;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(
            PluginRegistry::builtin().kinds(),
            vec!["auth", "dump", "fetch", "relay", "size", "store"]
        );
    }

    #[test]
    fn test_build_pipeline() {
        let dir = TempDir::new().unwrap();
        let users = dir.path().join("users");
        let mut file = std::fs::File::create(&users).unwrap();
        writeln!(file, "alice, {}, alice", password_digest("pw")).unwrap();

        let base_dir = dir.path().join("mail").display().to_string();
        let specs = vec![
            PluginSpec::new("auth").with_param("userconf", users.display().to_string()),
            PluginSpec::new("store").with_param("base_dir", base_dir.clone()),
            PluginSpec::new("fetch")
                .with_param("base_dir", base_dir)
                .with_match(MatchRule::Exists("//Fetch".to_string())),
            PluginSpec::new("relay").with_param("port", "4568"),
            PluginSpec::new("size"),
        ];

        let env = PluginEnv::for_tests("serverA");
        let pipeline = PluginRegistry::builtin().build_pipeline(&specs, &env).unwrap();
        assert_eq!(pipeline.names(), vec!["auth", "store", "fetch", "relay", "size"]);
    }

    #[test]
    fn test_build_errors() {
        let env = PluginEnv::for_tests("serverA");
        let registry = PluginRegistry::builtin();

        let unknown = registry.build_pipeline(&[PluginSpec::new("spamfilter")], &env);
        assert!(matches!(unknown, Err(Error::Config(_))));

        let missing = registry.build_pipeline(&[PluginSpec::new("auth")], &env);
        assert!(missing.is_err());

        let bad_match = registry.build_pipeline(
            &[PluginSpec::new("size").with_match(MatchRule::Absent("/".to_string()))],
            &env,
        );
        assert!(bad_match.is_err());
    }
}
