//! Process-wide registry of named connections.

use crate::{
    config::{ConnectionConfig, ConnectionsConfig},
    error::{OdmError, Result},
    transport::{OpenSearchTransport, Transport},
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Alias used when none is given.
pub const DEFAULT_ALIAS: &str = "default";

/// A handle to one cluster.
#[derive(Clone, Debug)]
pub struct Connection {
    transport: Arc<dyn Transport>,
}

impl Connection {
    /// Wrap a transport.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Wrap a shared transport.
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build an OpenSearch connection from configuration.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self::new(OpenSearchTransport::new(config)?))
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

/// Builds a connection from configuration.
pub type ConnectionFactory = Arc<dyn Fn(&ConnectionConfig) -> Result<Connection> + Send + Sync>;

#[derive(Default)]
struct Entry {
    connection: Option<Connection>,
    config: Option<ConnectionConfig>,
}

/// Alias to connection map with lazy construction.
///
/// Configured aliases materialize on first [`get_connection`]. Handles are
/// never torn down implicitly; [`clear`] drops everything.
///
/// [`get_connection`]: Connections::get_connection
/// [`clear`]: Connections::clear
pub struct Connections {
    entries: RwLock<HashMap<String, Entry>>,
    factory: RwLock<ConnectionFactory>,
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

impl Connections {
    /// Create an empty registry using the OpenSearch transport.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            factory: RwLock::new(Arc::new(Connection::from_config)),
        }
    }

    /// Replace the function that turns configuration into connections.
    pub fn set_factory(&self, factory: ConnectionFactory) {
        *self.factory.write() = factory;
    }

    /// Register configurations for lazy construction.
    ///
    /// Materialized connections survive only if their configuration is
    /// unchanged. Previously configured aliases missing from `configs` are
    /// removed; connections added directly are kept.
    pub fn configure(&self, configs: impl IntoIterator<Item = (String, ConnectionConfig)>) {
        let configs: HashMap<String, ConnectionConfig> = configs.into_iter().collect();
        let mut entries = self.entries.write();

        entries.retain(|alias, entry| entry.config.is_none() || configs.contains_key(alias));

        for (alias, config) in configs {
            let entry = entries.entry(alias.clone()).or_default();
            if entry.config.as_ref() != Some(&config) {
                debug!(alias = %alias, "Connection configured");
                entry.connection = None;
                entry.config = Some(config);
            }
        }
    }

    /// Register every alias of a loaded configuration file.
    pub fn configure_from(&self, config: &ConnectionsConfig) {
        self.configure(config.connections.clone());
    }

    /// Construct a connection now and register it.
    pub fn create_connection(&self, alias: &str, config: ConnectionConfig) -> Result<Connection> {
        let factory = self.factory.read().clone();
        let connection = factory(&config)?;
        info!(alias, "Connection created");
        self.entries.write().insert(
            alias.to_string(),
            Entry {
                connection: Some(connection.clone()),
                config: Some(config),
            },
        );
        Ok(connection)
    }

    /// Register an existing connection. Last write wins.
    pub fn add_connection(&self, alias: &str, connection: Connection) {
        info!(alias, "Connection added");
        self.entries.write().insert(
            alias.to_string(),
            Entry {
                connection: Some(connection),
                config: None,
            },
        );
    }

    /// Resolve an alias, building the connection if only configured.
    ///
    /// The factory runs without holding the registry lock. When two callers
    /// race, the first connection stored wins and the other is dropped.
    pub fn get_connection(&self, alias: Option<&str>) -> Result<Connection> {
        let alias = alias.unwrap_or(DEFAULT_ALIAS);

        let config = {
            let entries = self.entries.read();
            let entry = entries
                .get(alias)
                .ok_or_else(|| OdmError::KeyLookup(alias.to_string()))?;
            if let Some(connection) = &entry.connection {
                return Ok(connection.clone());
            }
            entry
                .config
                .clone()
                .ok_or_else(|| OdmError::KeyLookup(alias.to_string()))?
        };

        let factory = self.factory.read().clone();
        let connection = factory(&config)?;

        let mut entries = self.entries.write();
        match entries.get_mut(alias) {
            Some(entry) if entry.config.as_ref() == Some(&config) => {
                if let Some(existing) = &entry.connection {
                    return Ok(existing.clone());
                }
                info!(alias, "Connection materialized");
                entry.connection = Some(connection.clone());
            }
            _ => debug!(alias, "Alias changed while connecting; connection not cached"),
        }
        Ok(connection)
    }

    /// Remove an alias and its configuration.
    pub fn remove_connection(&self, alias: &str) -> Result<()> {
        match self.entries.write().remove(alias) {
            Some(_) => Ok(()),
            None => Err(OdmError::KeyLookup(alias.to_string())),
        }
    }

    /// Drop every connection and configuration.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.entries.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Whether the alias has a materialized connection.
    pub fn is_materialized(&self, alias: &str) -> bool {
        self.entries
            .read()
            .get(alias)
            .is_some_and(|entry| entry.connection.is_some())
    }
}

impl std::fmt::Debug for Connections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connections")
            .field("aliases", &self.aliases())
            .finish()
    }
}

static CONNECTIONS: Lazy<Connections> = Lazy::new(Connections::new);

/// The process-wide registry.
pub fn connections() -> &'static Connections {
    &CONNECTIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry() -> (Connections, Arc<AtomicUsize>) {
        let registry = Connections::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        registry.set_factory(Arc::new(move |_config: &ConnectionConfig| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Connection::new(MemoryTransport::new()))
        }));
        (registry, built)
    }

    #[test]
    fn test_unknown_alias() {
        let registry = Connections::new();
        let err = registry.get_connection(Some("missing")).unwrap_err();
        assert!(matches!(err, OdmError::KeyLookup(ref alias) if alias == "missing"));
        assert!(matches!(registry.get_connection(None), Err(OdmError::KeyLookup(ref a)) if a == "default"));
    }

    #[test]
    fn test_lazy_construction_happens_once() {
        let (registry, built) = counting_registry();
        registry.configure([("default".to_string(), ConnectionConfig::default())]);
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!registry.is_materialized("default"));

        registry.get_connection(None).unwrap();
        registry.get_connection(Some("default")).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(registry.is_materialized("default"));
    }

    #[test]
    fn test_reconfigure_keeps_unchanged() {
        let (registry, built) = counting_registry();
        let config = ConnectionConfig::new("http://a:9200");
        registry.configure([("a".to_string(), config.clone())]);
        registry.get_connection(Some("a")).unwrap();

        registry.configure([("a".to_string(), config)]);
        assert!(registry.is_materialized("a"));

        registry.configure([("a".to_string(), ConnectionConfig::new("http://b:9200"))]);
        assert!(!registry.is_materialized("a"));
        registry.get_connection(Some("a")).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_configure_drops_stale_configured_aliases() {
        let (registry, _) = counting_registry();
        registry.add_connection("direct", Connection::new(MemoryTransport::new()));
        registry.configure([("old".to_string(), ConnectionConfig::default())]);
        registry.configure([("new".to_string(), ConnectionConfig::default())]);
        assert_eq!(registry.aliases(), vec!["direct", "new"]);
    }

    #[test]
    fn test_add_last_write_wins_and_remove() {
        let registry = Connections::new();
        let first = MemoryTransport::new();
        let second = MemoryTransport::new();
        registry.add_connection("x", Connection::new(first));
        registry.add_connection("x", Connection::new(second));
        assert_eq!(registry.aliases(), vec!["x"]);

        registry.remove_connection("x").unwrap();
        assert!(registry.remove_connection("x").is_err());
        assert!(registry.get_connection(Some("x")).is_err());
    }

    #[test]
    fn test_create_connection_is_immediate() {
        let (registry, built) = counting_registry();
        registry.create_connection("now", ConnectionConfig::default()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(registry.is_materialized("now"));
    }

    #[test]
    fn test_factory_errors_propagate() {
        let registry = Connections::new();
        registry.configure([(
            "bad".to_string(),
            ConnectionConfig::builder().hosts(Vec::new()).build(),
        )]);
        assert!(matches!(registry.get_connection(Some("bad")), Err(OdmError::Config(_))));
        assert!(!registry.is_materialized("bad"));
    }

    #[test]
    fn test_factory_may_use_registry() {
        let registry = Arc::new(Connections::new());
        registry.add_connection("base", Connection::new(MemoryTransport::new()));

        let inner = Arc::downgrade(&registry);
        registry.set_factory(Arc::new(move |_config: &ConnectionConfig| {
            let registry = inner
                .upgrade()
                .ok_or_else(|| OdmError::Connection("registry dropped".to_string()))?;
            registry.get_connection(Some("base"))
        }));
        registry.configure([("derived".to_string(), ConnectionConfig::default())]);

        registry.get_connection(Some("derived")).unwrap();
        assert!(registry.is_materialized("derived"));
    }

    #[test]
    fn test_clear() {
        let registry = Connections::new();
        registry.add_connection("a", Connection::new(MemoryTransport::new()));
        registry.clear();
        assert!(registry.aliases().is_empty());
    }
}
