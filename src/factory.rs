use crate::button::Button;
use crate::config::schema::ButtonConfig;
use crate::connection::{ConnectionManager, ConnectionName};
use std::sync::Arc;
use tracing::warn;

/// Turns button configuration records into buttons.
///
/// Factories are asked in registration order; the first one that returns a
/// button wins. Unknown types yield `None` so the next factory gets a chance,
/// and so do recognized types with bad fields (after logging why).
pub trait ButtonFactory: Send {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>>;

    /// Release backend connections.
    fn close(&self);
}

/// Required string field of a button, logging if it is missing.
pub fn required_string(config: &ButtonConfig, button_type: &str, key: &str) -> Option<String> {
    let value = config.string(key);
    if value.is_none() {
        warn!("a {button_type} button must have a {key} field");
    }
    value
}

/// Resolve the backend client a button refers to, logging failures.
pub fn resolve_connection<T: Clone>(
    connections: &ConnectionManager<T>,
    config: &ButtonConfig,
    button_type: &str,
) -> Option<T> {
    let name: ConnectionName = config.connection();
    connections
        .get(&name)
        .map_err(|e| warn!("cannot create {button_type} button: {e}"))
        .ok()
}
