use crate::config::schema::ConnectionConfig;
use crate::error::{DeckError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of a backend connection.
///
/// `Legacy` is the reserved backward-compatible connection configured on the
/// command line; it is what buttons without a `connection` field use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionName {
    Legacy,
    Named(String),
}

impl ConnectionName {
    pub fn named(name: &str) -> Self {
        Self::from(Some(name))
    }
}

impl From<Option<&str>> for ConnectionName {
    fn from(name: Option<&str>) -> Self {
        match name {
            None | Some("") => Self::Legacy,
            Some(name) => Self::Named(name.to_string()),
        }
    }
}

impl fmt::Display for ConnectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("<legacy>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Looks up raw connection configuration by name and backend kind.
pub trait ConnectionConfigProvider: Send + Sync {
    fn get_connection(&self, name: &str, kind: &str) -> Option<ConnectionConfig>;
}

/// The `connections` table of the loaded configuration, keyed by (name, kind).
///
/// Cheap to clone; all clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    table: Arc<RwLock<HashMap<(String, String), ConnectionConfig>>>,
}

impl Connections {
    pub fn replace(&self, table: HashMap<(String, String), ConnectionConfig>) {
        *self.table.write() = table;
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl ConnectionConfigProvider for Connections {
    fn get_connection(&self, name: &str, kind: &str) -> Option<ConnectionConfig> {
        self.table
            .read()
            .get(&(name.to_string(), kind.to_string()))
            .cloned()
    }
}

type ConnectionFactory<T> = Box<dyn Fn(&str, &ConnectionConfig) -> Result<T> + Send + Sync>;

/// Owns at most one client per connection name for one backend kind.
///
/// Clients are created lazily on first `get` and memoized; the legacy client
/// is pre-registered and never goes through the factory.
pub struct ConnectionManager<T: Clone> {
    kind: &'static str,
    provider: Arc<dyn ConnectionConfigProvider>,
    factory: ConnectionFactory<T>,
    connections: Mutex<HashMap<String, T>>,
    legacy: Option<T>,
}

impl<T: Clone> ConnectionManager<T> {
    pub fn new<F>(kind: &'static str, provider: Arc<dyn ConnectionConfigProvider>, factory: F) -> Self
    where
        F: Fn(&str, &ConnectionConfig) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            kind,
            provider,
            factory: Box::new(factory),
            connections: Mutex::new(HashMap::new()),
            legacy: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn set_legacy(&mut self, connection: T) {
        self.legacy = Some(connection);
    }

    /// Get the client for a connection, creating it on first use.
    ///
    /// # Errors
    /// Returns `DeckError::NoLegacyConnection` or `DeckError::ConnectionNotFound`
    /// if nothing is configured under that name, or the factory's error.
    pub fn get(&self, name: &ConnectionName) -> Result<T> {
        let name = match name {
            ConnectionName::Legacy => {
                return self
                    .legacy
                    .clone()
                    .ok_or_else(|| DeckError::NoLegacyConnection(self.kind.to_string()));
            }
            ConnectionName::Named(name) => name,
        };

        // The lock is held across the factory call so a name is never built twice.
        let mut connections = self.connections.lock();
        if let Some(connection) = connections.get(name) {
            return Ok(connection.clone());
        }

        let config = self
            .provider
            .get_connection(name, self.kind)
            .ok_or_else(|| DeckError::ConnectionNotFound {
                kind: self.kind.to_string(),
                name: name.clone(),
            })?;

        debug!("creating {} connection {name}", self.kind);
        let connection = (self.factory)(name, &config)?;
        connections.insert(name.clone(), connection.clone());
        Ok(connection)
    }

    /// Visit every created client plus the legacy one.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for connection in self.connections.lock().values() {
            f(connection);
        }
        if let Some(legacy) = &self.legacy {
            f(legacy);
        }
    }
}
