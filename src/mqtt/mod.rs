//! Shack accessories on an MQTT broker: ATU-100 tuners and generic switches.

pub mod buttons;
pub mod client;

use crate::button::Button;
use crate::config::schema::{ButtonConfig, ConnectionConfig, LABEL};
use crate::connection::{ConnectionConfigProvider, ConnectionManager};
use crate::error::{DeckError, Result};
use crate::factory::{resolve_connection, ButtonFactory};
use buttons::{Atu100TuneButton, SwitchButton, SwitchConfig, SwitchMode};
use client::MqttClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub const CONNECTION_TYPE: &str = "mqtt";

pub const AT100_TUNE_BUTTON_TYPE: &str = "mqtt.AT100Tune";
/// Older name of `mqtt.AT100Tune`.
pub const LEGACY_TUNE_BUTTON_TYPE: &str = "atu100.Tune";
pub const SWITCH_BUTTON_TYPE: &str = "mqtt.Switch";

const ADDRESS: &str = "address";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const PATH: &str = "path";
const INPUT_TOPIC: &str = "inputTopic";
const OUTPUT_TOPIC: &str = "outputTopic";
const ON_PAYLOAD: &str = "onPayload";
const OFF_PAYLOAD: &str = "offPayload";
const MODE: &str = "mode";

/// Broker given on the command line.
#[derive(Debug, Clone, Default)]
pub struct LegacyBroker {
    pub address: String,
    pub username: String,
    pub password: String,
}

pub struct MqttButtonFactory {
    connections: ConnectionManager<Arc<MqttClient>>,
}

impl MqttButtonFactory {
    /// An empty legacy address means there is no legacy connection.
    /// Cancelling `stop` shuts down every broker client of this factory.
    pub fn new(
        provider: Arc<dyn ConnectionConfigProvider>,
        legacy: &LegacyBroker,
        stop: &CancellationToken,
    ) -> Self {
        let clients = stop.clone();
        let mut connections = ConnectionManager::new(CONNECTION_TYPE, provider, move |name, config| {
            create_client(name, config, &clients)
        });
        if !legacy.address.is_empty() {
            match MqttClient::open(&legacy.address, &legacy.username, &legacy.password, stop) {
                Ok(client) => connections.set_legacy(client),
                Err(e) => error!("cannot use the MQTT broker from the command line: {e}"),
            }
        }
        Self { connections }
    }

    fn create_at100_tune_button(&self, kind: &str, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let Some(path) = config.string(PATH) else {
            warn!("a {kind} button must have a path field");
            return None;
        };
        let label = config.string(LABEL).unwrap_or_else(|| "Tune".to_string());
        let client = resolve_connection(&self.connections, config, kind)?;
        Some(Atu100TuneButton::new(client, &path, label))
    }

    fn create_switch_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        let fields = (
            config.string(INPUT_TOPIC),
            config.string(OUTPUT_TOPIC),
            config.string(ON_PAYLOAD),
            config.string(OFF_PAYLOAD),
            config.string(MODE),
        );
        let (Some(input_topic), Some(output_topic), Some(on_payload), Some(off_payload), Some(mode)) = fields
        else {
            warn!(
                "a {SWITCH_BUTTON_TYPE} button must have label, inputTopic, outputTopic, onPayload, offPayload and mode fields"
            );
            return None;
        };
        let mode = match mode.parse::<SwitchMode>() {
            Ok(mode) => mode,
            Err(e) => {
                warn!("cannot create {SWITCH_BUTTON_TYPE} button: {e}");
                return None;
            }
        };
        let client = resolve_connection(&self.connections, config, SWITCH_BUTTON_TYPE)?;
        let config = SwitchConfig {
            label: config.string(LABEL).unwrap_or_else(|| "SW".to_string()),
            input_topic,
            output_topic,
            on_payload,
            off_payload,
            mode,
        };
        Some(SwitchButton::new(client, config))
    }
}

fn create_client(name: &str, config: &ConnectionConfig, stop: &CancellationToken) -> Result<Arc<MqttClient>> {
    let address = config.string(ADDRESS).ok_or_else(|| {
        DeckError::Config(format!("no address defined for mqtt connection {name}"))
    })?;
    MqttClient::open(
        &address,
        &config.string_or_default(USERNAME),
        &config.string_or_default(PASSWORD),
        stop,
    )
}

impl ButtonFactory for MqttButtonFactory {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        match config.kind()? {
            kind @ (AT100_TUNE_BUTTON_TYPE | LEGACY_TUNE_BUTTON_TYPE) => {
                self.create_at100_tune_button(kind, config)
            }
            SWITCH_BUTTON_TYPE => self.create_switch_button(config),
            _ => None,
        }
    }

    fn close(&self) {
        self.connections.for_each(|client| client.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connections;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn record(value: Value) -> ButtonConfig {
        match value {
            Value::Object(fields) => ButtonConfig::new(fields),
            _ => unreachable!(),
        }
    }

    fn legacy() -> LegacyBroker {
        LegacyBroker {
            address: "127.0.0.1:1".into(),
            ..LegacyBroker::default()
        }
    }

    fn factory(connections: Connections, legacy: &LegacyBroker) -> MqttButtonFactory {
        MqttButtonFactory::new(Arc::new(connections), legacy, &CancellationToken::new())
    }

    #[tokio::test]
    async fn creates_tuner_and_switch_buttons() {
        let factory = factory(Connections::default(), &legacy());
        let tune = record(json!({"type": "mqtt.AT100Tune", "path": "shack/atu"}));
        let legacy_tune = record(json!({"type": "atu100.Tune", "label": "ATU", "path": "shack/atu"}));
        let switch = record(json!({
            "type": "mqtt.Switch",
            "label": "Amp",
            "inputTopic": "amp/state",
            "outputTopic": "amp/set",
            "onPayload": "ON",
            "offPayload": "OFF",
            "mode": "toggle"
        }));
        assert!(factory.create_button(&tune).is_some());
        assert!(factory.create_button(&legacy_tune).is_some());
        assert!(factory.create_button(&switch).is_some());
        factory.close();
    }

    #[tokio::test]
    async fn incomplete_buttons_are_rejected() {
        let factory = factory(Connections::default(), &legacy());
        let configs = [
            json!({"type": "mqtt.AT100Tune", "label": "ATU"}),
            json!({"type": "atu100.Tune", "label": "ATU"}),
            json!({"type": "mqtt.Switch", "inputTopic": "a", "outputTopic": "b", "mode": "ON"}),
            json!({
                "type": "mqtt.Switch",
                "inputTopic": "a",
                "outputTopic": "b",
                "onPayload": "1",
                "offPayload": "0",
                "mode": "dim"
            }),
            json!({"type": "hamlib.MOX"}),
        ];
        for config in configs {
            assert!(factory.create_button(&record(config.clone())).is_none(), "{config}");
        }
        factory.close();
    }

    #[tokio::test]
    async fn named_brokers_come_from_connections() {
        let connections = Connections::default();
        let mut table = HashMap::new();
        table.insert(
            ("shack".to_string(), CONNECTION_TYPE.to_string()),
            record(json!({"type": "mqtt", "address": "127.0.0.1:1", "username": "op"})),
        );
        table.insert(
            ("broken".to_string(), CONNECTION_TYPE.to_string()),
            record(json!({"type": "mqtt"})),
        );
        connections.replace(table);
        let factory = factory(connections, &LegacyBroker::default());

        let named = record(json!({"type": "mqtt.AT100Tune", "path": "atu", "connection": "shack"}));
        let broken = record(json!({"type": "mqtt.AT100Tune", "path": "atu", "connection": "broken"}));
        let legacy = record(json!({"type": "mqtt.AT100Tune", "path": "atu"}));
        assert!(factory.create_button(&named).is_some());
        assert!(factory.create_button(&broken).is_none());
        assert!(factory.create_button(&legacy).is_none());

        let mut addresses = Vec::new();
        factory
            .connections
            .for_each(|client| addresses.push(client.address().to_string()));
        assert_eq!(addresses, vec!["127.0.0.1:1"]);
        factory.close();
    }

    #[tokio::test]
    async fn stopping_the_daemon_closes_the_brokers() {
        let stop = CancellationToken::new();
        let factory = MqttButtonFactory::new(Arc::new(Connections::default()), &legacy(), &stop);
        let tune = record(json!({"type": "mqtt.AT100Tune", "path": "atu"}));
        let button = factory.create_button(&tune);
        assert!(button.is_some());

        stop.cancel();
        let mut closed = Vec::new();
        factory.connections.for_each(|client| closed.push(client.is_closed()));
        assert_eq!(closed, vec![true]);
    }
}
