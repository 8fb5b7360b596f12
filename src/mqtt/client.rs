use crate::backend::{keep_open, with_default_port, ConnectionState, Link, Observers};
use crate::button::Enabler;
use crate::error::{DeckError, Result};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KIND: &str = "mqtt";
const CLIENT_ID: &str = "hamdeck";
const REQUEST_CAPACITY: usize = 64;

pub const DEFAULT_PORT: u16 = 1883;
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Liveness and measurements of one ATU-100 tuner.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Atu100State {
    pub alive: bool,
    pub tx: bool,
    pub tuning: bool,
    pub swr: f64,
}

#[derive(Debug, Deserialize)]
struct Atu100Data {
    #[serde(default, rename = "txing")]
    tx: bool,
    #[serde(default)]
    tuning: bool,
    #[serde(default)]
    swr: f64,
}

pub trait AliveListener: Send + Sync {
    fn set_alive(&self, path: &str, alive: bool);
}

pub trait TxListener: Send + Sync {
    fn set_tx(&self, path: &str, tx: bool);
}

pub trait TuneListener: Send + Sync {
    fn set_tune(&self, path: &str, tuning: bool);
}

pub trait SwrListener: Send + Sync {
    fn set_swr(&self, path: &str, swr: f64);
}

/// Receives every message of a subscribed topic.
pub trait MessageListener: Send + Sync {
    fn message(&self, topic: &str, payload: &str);
}

/// Outgoing side of a live broker session.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    fn subscribe(&self, topic: &str) -> Result<()>;
}

/// Incoming side of a live broker session.
pub(crate) trait Inbox: Send {
    /// The next published message; an error ends the session.
    fn next_message(&mut self) -> impl Future<Output = Result<(String, Vec<u8>)>> + Send;
}

impl Inbox for EventLoop {
    async fn next_message(&mut self) -> Result<(String, Vec<u8>)> {
        loop {
            match self.poll().await {
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    return Ok((message.topic, message.payload.to_vec()));
                }
                Ok(_) => {}
                Err(e) => return Err(DeckError::connection(KIND, e)),
            }
        }
    }
}

impl Publisher for AsyncClient {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| DeckError::connection(KIND, e))
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| DeckError::connection(KIND, e))
    }
}

#[derive(Default)]
struct Shared {
    publisher: Mutex<Option<Arc<dyn Publisher>>>,
    topics: Mutex<BTreeSet<String>>,
    atu100: Mutex<HashMap<String, Atu100State>>,
    alive: Observers<dyn AliveListener>,
    tx: Observers<dyn TxListener>,
    tuning: Observers<dyn TuneListener>,
    swr: Observers<dyn SwrListener>,
    messages: Observers<dyn MessageListener>,
}

/// Uninstalls the session publisher when the session ends, however it ends.
struct Installed<'a> {
    shared: &'a Shared,
}

impl Drop for Installed<'_> {
    fn drop(&mut self) {
        *self.shared.publisher.lock() = None;
    }
}

impl Shared {
    /// Install the publisher of a new session and snapshot the topics it
    /// must subscribe. Both happen under the publisher lock, so a concurrent
    /// `subscribe` lands either in the snapshot or on the new publisher.
    fn install(&self, publisher: Arc<dyn Publisher>) -> (Installed<'_>, Vec<String>) {
        let mut current = self.publisher.lock();
        *current = Some(publisher);
        let topics = self.topics.lock().iter().cloned().collect();
        (Installed { shared: self }, topics)
    }

    fn subscribe(&self, topic: String) {
        let publisher = {
            let publisher = self.publisher.lock();
            if !self.topics.lock().insert(topic.clone()) {
                return;
            }
            publisher.clone()
        };
        if let Some(publisher) = publisher {
            if let Err(e) = publisher.subscribe(&topic) {
                warn!("cannot subscribe to {topic}: {e}");
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        self.messages.notify(|l| l.message(topic, &text));

        let topic = topic.to_lowercase();
        let Some((path, suffix)) = split_topic(&topic) else {
            return;
        };
        if !self.atu100.lock().contains_key(path) {
            return;
        }
        match suffix {
            "alive" => self.update_alive(path, text.trim() == "true"),
            "data" => match serde_json::from_slice::<Atu100Data>(payload) {
                Ok(data) => {
                    self.update_tx(path, data.tx);
                    self.update_tuning(path, data.tuning);
                    self.update_swr(path, data.swr);
                }
                Err(e) => warn!("invalid ATU-100 payload from {topic}: {e}"),
            },
            _ => {}
        }
    }

    /// Apply `change` to the state of `path`; returns `true` if it changed.
    fn update(&self, path: &str, change: impl FnOnce(&mut Atu100State)) -> bool {
        let mut atu100 = self.atu100.lock();
        let state = atu100.entry(path.to_string()).or_default();
        let before = *state;
        change(state);
        *state != before
    }

    fn update_alive(&self, path: &str, alive: bool) {
        if self.update(path, |s| s.alive = alive) {
            self.alive.notify(|l| l.set_alive(path, alive));
        }
    }

    fn update_tx(&self, path: &str, tx: bool) {
        if self.update(path, |s| s.tx = tx) {
            self.tx.notify(|l| l.set_tx(path, tx));
        }
    }

    fn update_tuning(&self, path: &str, tuning: bool) {
        if self.update(path, |s| s.tuning = tuning) {
            self.tuning.notify(|l| l.set_tune(path, tuning));
        }
    }

    fn update_swr(&self, path: &str, swr: f64) {
        if self.update(path, |s| s.swr = swr) {
            self.swr.notify(|l| l.set_swr(path, swr));
        }
    }
}

/// `path/suffix` split at the last slash; both parts must be non-empty.
pub fn split_topic(topic: &str) -> Option<(&str, &str)> {
    let (path, suffix) = topic.rsplit_once('/')?;
    if path.is_empty() || suffix.is_empty() {
        return None;
    }
    Some((path, suffix))
}

/// Client of an MQTT broker.
pub struct MqttClient {
    address: String,
    state: Arc<ConnectionState>,
    shared: Arc<Shared>,
    stop: CancellationToken,
}

impl MqttClient {
    /// Start a client that keeps a session with the broker at `address` open
    /// until `stop` or [`MqttClient::close`] ends it.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `DeckError::Config` if the address has no valid port.
    pub fn open(
        address: &str,
        username: &str,
        password: &str,
        stop: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let address = with_default_port(address, DEFAULT_PORT);
        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| DeckError::Config(format!("invalid MQTT broker address {address}")))?;

        let mut options = MqttOptions::new(CLIENT_ID, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if !username.is_empty() {
            options.set_credentials(username, password);
        }

        let state = Arc::new(ConnectionState::new());
        let shared = Arc::new(Shared::default());
        let stop = stop.child_token();
        let link = Arc::new(BrokerLink {
            name: format!("MQTT broker {address}"),
            options,
            shared: shared.clone(),
        });
        tokio::spawn(keep_open(link, state.clone(), RETRY_INTERVAL, stop.clone()));

        Ok(Arc::new(Self {
            address,
            state,
            shared,
            stop,
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn listen_enabled(&self, listener: Weak<dyn Enabler>) {
        self.state.listen(listener);
    }

    pub fn listen_alive(&self, listener: Weak<dyn AliveListener>) {
        self.shared.alive.add(listener);
    }

    pub fn listen_tx(&self, listener: Weak<dyn TxListener>) {
        self.shared.tx.add(listener);
    }

    pub fn listen_tune(&self, listener: Weak<dyn TuneListener>) {
        self.shared.tuning.add(listener);
    }

    pub fn listen_swr(&self, listener: Weak<dyn SwrListener>) {
        self.shared.swr.add(listener);
    }

    pub fn listen_messages(&self, listener: Weak<dyn MessageListener>) {
        self.shared.messages.add(listener);
    }

    /// Track an ATU-100 publishing below `path`.
    ///
    /// Topics keep the configured case. Returns the case-folded key that
    /// listeners receive for this tuner.
    pub fn add_atu100(&self, path: &str) -> String {
        let key = path.to_lowercase();
        self.shared.atu100.lock().entry(key.clone()).or_default();
        self.shared.subscribe(format!("{path}/data"));
        self.shared.subscribe(format!("{path}/alive"));
        key
    }

    pub fn atu100(&self, path: &str) -> Atu100State {
        self.shared
            .atu100
            .lock()
            .get(&path.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Start tuning the ATU-100 below `path`.
    pub fn tune(&self, path: &str) {
        self.publish(&format!("{path}/cmd"), "1");
    }

    pub fn subscribe(&self, topic: &str) {
        self.shared.subscribe(topic.to_string());
    }

    pub fn publish(&self, topic: &str, payload: &str) {
        let publisher = self.shared.publisher.lock().clone();
        let Some(publisher) = publisher else {
            warn!("cannot publish to {topic}: not connected to {}", self.address);
            return;
        };
        debug!("publishing '{payload}' to {topic}");
        if let Err(e) = publisher.publish(topic, payload) {
            warn!("cannot publish to {topic}: {e}");
        }
    }
}

#[cfg(test)]
impl MqttClient {
    pub(crate) fn offline() -> Arc<Self> {
        Arc::new(Self {
            address: "localhost:1883".to_string(),
            state: Arc::new(ConnectionState::new()),
            shared: Arc::new(Shared::default()),
            stop: CancellationToken::new(),
        })
    }

    /// Connect to a publisher instead of a broker.
    pub(crate) fn inject_publisher(&self, publisher: Arc<dyn Publisher>) {
        *self.shared.publisher.lock() = Some(publisher);
        self.state.set_connected(true);
    }

    pub(crate) fn inject_connected(&self, connected: bool) {
        self.state.set_connected(connected);
    }

    pub(crate) fn inject_message(&self, topic: &str, payload: &str) {
        self.shared.dispatch(topic, payload.as_bytes());
    }
}

struct BrokerSession {
    client: AsyncClient,
    events: EventLoop,
}

struct BrokerLink {
    name: String,
    options: MqttOptions,
    shared: Arc<Shared>,
}

impl Link for BrokerLink {
    type Session = BrokerSession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<BrokerSession> {
        let (client, mut events) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        loop {
            match events.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(DeckError::connection(
                            KIND,
                            format!("broker refused the connection: {:?}", ack.code),
                        ));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(DeckError::connection(KIND, e)),
            }
        }
        Ok(BrokerSession { client, events })
    }

    async fn serve(&self, mut session: BrokerSession) -> Result<()> {
        run_session(&self.shared, Arc::new(session.client), &mut session.events).await
    }
}

/// Subscribe every known topic, then dispatch incoming messages until the
/// inbox fails.
async fn run_session<I: Inbox>(shared: &Shared, publisher: Arc<dyn Publisher>, inbox: &mut I) -> Result<()> {
    let (_installed, topics) = shared.install(publisher.clone());
    for topic in &topics {
        publisher.subscribe(topic)?;
    }
    loop {
        let (topic, payload) = inbox.next_message().await?;
        shared.dispatch(&topic, &payload);
    }
}
