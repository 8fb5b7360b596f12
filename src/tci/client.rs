use super::protocol::{parse_frame, Message};
use crate::backend::{keep_open, with_default_port, ConnectionState, Link, Observers};
use crate::button::Enabler;
use crate::error::{DeckError, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KIND: &str = "tci";

pub const DEFAULT_PORT: u16 = 40001;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub trait TxListener: Send + Sync {
    fn set_tx(&self, trx: i64, ptt: bool);
}

pub trait TuneListener: Send + Sync {
    fn set_tune(&self, trx: i64, tuning: bool);
}

pub trait ModeListener: Send + Sync {
    fn set_mode(&self, trx: i64, mode: &str);
}

pub trait MuteListener: Send + Sync {
    fn set_mute(&self, muted: bool);
}

pub trait DriveListener: Send + Sync {
    fn set_drive(&self, percent: i64);
}

/// Frequency of VFO A.
pub trait FrequencyListener: Send + Sync {
    fn set_frequency(&self, trx: i64, frequency: u64);
}

pub trait FilterListener: Send + Sync {
    fn set_rx_filter_band(&self, trx: i64, low: i64, high: i64);
}

pub trait VolumeListener: Send + Sync {
    fn set_volume(&self, db: i64);
}

/// Last reported transceiver state; per-trx values are keyed by trx index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrxStatus {
    pub tx: HashMap<i64, bool>,
    pub tune: HashMap<i64, bool>,
    /// Lower case modulation names.
    pub modes: HashMap<i64, String>,
    /// VFO A frequency in Hz.
    pub frequencies: HashMap<i64, u64>,
    /// RX filter passband edges in Hz, relative to the carrier.
    pub filters: HashMap<i64, (i64, i64)>,
    pub mute: Option<bool>,
    pub drive: Option<i64>,
    /// Main volume in dB.
    pub volume: Option<i64>,
}

#[derive(Default)]
struct Shared {
    status: Mutex<TrxStatus>,
    tx: Observers<dyn TxListener>,
    tune: Observers<dyn TuneListener>,
    modes: Observers<dyn ModeListener>,
    mute: Observers<dyn MuteListener>,
    drive: Observers<dyn DriveListener>,
    frequencies: Observers<dyn FrequencyListener>,
    filters: Observers<dyn FilterListener>,
    volume: Observers<dyn VolumeListener>,
}

/// Store `value` in `slot`; returns `true` if it changed.
fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

impl Shared {
    fn dispatch(&self, frame: &str) {
        for message in parse_frame(frame) {
            self.handle(&message);
        }
    }

    fn handle(&self, message: &Message) {
        match message.name.as_str() {
            "trx" => {
                if let (Some(trx), Some(ptt)) = (message.int_arg(0), message.bool_arg(1)) {
                    self.set_tx(trx, ptt);
                }
            }
            "tune" => {
                if let (Some(trx), Some(tuning)) = (message.int_arg(0), message.bool_arg(1)) {
                    self.set_tune(trx, tuning);
                }
            }
            "modulation" => {
                if let (Some(trx), Some(mode)) = (message.int_arg(0), message.arg(1)) {
                    self.set_mode(trx, mode.to_lowercase());
                }
            }
            "mute" => {
                if let Some(muted) = message.bool_arg(0) {
                    self.set_mute(muted);
                }
            }
            "drive" => {
                if let Some(percent) = message.last_arg().and_then(|a| a.parse().ok()) {
                    self.set_drive(percent);
                }
            }
            "vfo" => {
                let frequency = message.arg(2).and_then(|a| a.parse::<u64>().ok());
                if let (Some(trx), Some(0), Some(frequency)) = (message.int_arg(0), message.int_arg(1), frequency) {
                    self.set_frequency(trx, frequency);
                }
            }
            "rx_filter_band" => {
                if let (Some(trx), Some(low), Some(high)) = (message.int_arg(0), message.int_arg(1), message.int_arg(2)) {
                    self.set_rx_filter_band(trx, low, high);
                }
            }
            "volume" => {
                if let Some(db) = message.last_arg().and_then(|a| a.parse().ok()) {
                    self.set_volume(db);
                }
            }
            _ => {}
        }
    }

    fn set_tx(&self, trx: i64, ptt: bool) {
        let changed = self.status.lock().tx.insert(trx, ptt) != Some(ptt);
        if changed {
            self.tx.notify(|l| l.set_tx(trx, ptt));
        }
    }

    fn set_tune(&self, trx: i64, tuning: bool) {
        let changed = self.status.lock().tune.insert(trx, tuning) != Some(tuning);
        if changed {
            self.tune.notify(|l| l.set_tune(trx, tuning));
        }
    }

    fn set_mode(&self, trx: i64, mode: String) {
        let changed = self.status.lock().modes.insert(trx, mode.clone()).as_ref() != Some(&mode);
        if changed {
            self.modes.notify(|l| l.set_mode(trx, &mode));
        }
    }

    fn set_mute(&self, muted: bool) {
        let changed = replace(&mut self.status.lock().mute, muted);
        if changed {
            self.mute.notify(|l| l.set_mute(muted));
        }
    }

    fn set_drive(&self, percent: i64) {
        let changed = replace(&mut self.status.lock().drive, percent);
        if changed {
            self.drive.notify(|l| l.set_drive(percent));
        }
    }

    fn set_frequency(&self, trx: i64, frequency: u64) {
        let changed = self.status.lock().frequencies.insert(trx, frequency) != Some(frequency);
        if changed {
            self.frequencies.notify(|l| l.set_frequency(trx, frequency));
        }
    }

    fn set_rx_filter_band(&self, trx: i64, low: i64, high: i64) {
        let changed = self.status.lock().filters.insert(trx, (low, high)) != Some((low, high));
        if changed {
            self.filters.notify(|l| l.set_rx_filter_band(trx, low, high));
        }
    }

    fn set_volume(&self, db: i64) {
        let changed = replace(&mut self.status.lock().volume, db);
        if changed {
            self.volume.notify(|l| l.set_volume(db));
        }
    }
}

/// Client of a TCI server (an SDR application speaking the Transceiver Control Interface).
pub struct TciClient {
    address: String,
    state: Arc<ConnectionState>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Message>,
    stop: CancellationToken,
}

impl TciClient {
    /// Start a client that keeps the WebSocket to `address` open until
    /// `close` is called or `stop` is cancelled. Must be called from within
    /// a tokio runtime.
    pub fn open(address: &str, stop: &CancellationToken) -> Arc<Self> {
        Self::open_with_retry(address, RETRY_INTERVAL, stop)
    }

    fn open_with_retry(address: &str, retry_interval: Duration, stop: &CancellationToken) -> Arc<Self> {
        let address = with_default_port(address, DEFAULT_PORT);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ConnectionState::new());
        let shared = Arc::new(Shared::default());
        let stop = stop.child_token();

        let link = Arc::new(TciLink {
            name: format!("TCI server {address}"),
            url: format!("ws://{address}"),
            shared: shared.clone(),
            requests: tokio::sync::Mutex::new(request_rx),
        });
        tokio::spawn(keep_open(link, state.clone(), retry_interval, stop.clone()));

        Arc::new(Self {
            address,
            state,
            shared,
            requests,
            stop,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn status(&self) -> TrxStatus {
        self.shared.status.lock().clone()
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

    pub fn listen_tx(&self, listener: Weak<dyn TxListener>) {
        self.shared.tx.add(listener);
    }

    pub fn listen_tune(&self, listener: Weak<dyn TuneListener>) {
        self.shared.tune.add(listener);
    }

    pub fn listen_mode(&self, listener: Weak<dyn ModeListener>) {
        self.shared.modes.add(listener);
    }

    pub fn listen_mute(&self, listener: Weak<dyn MuteListener>) {
        self.shared.mute.add(listener);
    }

    pub fn listen_drive(&self, listener: Weak<dyn DriveListener>) {
        self.shared.drive.add(listener);
    }

    pub fn listen_frequency(&self, listener: Weak<dyn FrequencyListener>) {
        self.shared.frequencies.add(listener);
    }

    pub fn listen_rx_filter_band(&self, listener: Weak<dyn FilterListener>) {
        self.shared.filters.add(listener);
    }

    pub fn listen_volume(&self, listener: Weak<dyn VolumeListener>) {
        self.shared.volume.add(listener);
    }

    pub fn set_tx(&self, trx: i64, ptt: bool) {
        self.request(Message::new("trx", &[&trx, &ptt]));
    }

    pub fn set_tune(&self, trx: i64, tuning: bool) {
        self.request(Message::new("tune", &[&trx, &tuning]));
    }

    pub fn set_mode(&self, trx: i64, mode: &str) {
        self.request(Message::new("modulation", &[&trx, &mode]));
    }

    pub fn set_mute(&self, muted: bool) {
        self.request(Message::new("mute", &[&muted]));
    }

    /// Drive level in percent.
    pub fn set_drive(&self, percent: i64) {
        self.request(Message::new("drive", &[&percent]));
    }

    /// Tune VFO A of `trx`.
    pub fn set_vfo_frequency(&self, trx: i64, frequency: u64) {
        self.request(Message::new("vfo", &[&trx, &0, &frequency]));
    }

    /// Center of the panorama display.
    pub fn set_dds(&self, trx: i64, frequency: u64) {
        self.request(Message::new("dds", &[&trx, &frequency]));
    }

    pub fn set_rx_filter_band(&self, trx: i64, low: i64, high: i64) {
        self.request(Message::new("rx_filter_band", &[&trx, &low, &high]));
    }

    /// Main volume in dB, -60 to 0.
    pub fn set_volume(&self, db: i64) {
        self.request(Message::new("volume", &[&db]));
    }

    fn request(&self, message: Message) {
        if !self.is_connected() {
            warn!("cannot send '{message}' to {}: not connected", self.address);
            return;
        }
        if self.requests.send(message).is_err() {
            debug!("TCI session of {} is gone", self.address);
        }
    }
}

#[cfg(test)]
impl TciClient {
    /// A client without a supervisor; requests end up in the returned receiver.
    pub(crate) fn offline() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            address: "localhost:40001".to_string(),
            state: Arc::new(ConnectionState::new()),
            shared: Arc::new(Shared::default()),
            requests,
            stop: CancellationToken::new(),
        });
        (client, request_rx)
    }

    pub(crate) fn inject_connected(&self, connected: bool) {
        self.state.set_connected(connected);
    }

    pub(crate) fn inject_frame(&self, frame: &str) {
        self.shared.dispatch(frame);
    }
}

type TciSession = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TciLink {
    name: String,
    url: String,
    shared: Arc<Shared>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Link for TciLink {
    type Session = TciSession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<TciSession> {
        let (socket, _) = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| DeckError::connection(KIND, "connect timed out"))?
            .map_err(|e| DeckError::connection(KIND, e))?;
        Ok(socket)
    }

    async fn serve(&self, socket: TciSession) -> Result<()> {
        let mut requests = self.requests.lock().await;
        let mut stale = 0;
        while requests.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("dropped {stale} stale requests for {}", self.name);
        }
        *self.shared.status.lock() = TrxStatus::default();

        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    None | Some(Ok(Frame::Close(_))) => return Ok(()),
                    Some(Ok(Frame::Text(text))) => self.shared.dispatch(&text),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(DeckError::protocol(KIND, e)),
                },
                request = requests.recv() => {
                    let Some(request) = request else {
                        return Ok(());
                    };
                    debug!("sending '{request}' to {}", self.name);
                    sink.send(Frame::text(request.to_string()))
                        .await
                        .map_err(|e| DeckError::connection(KIND, e))?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::{wait_until, EnableRecorder};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[derive(Default)]
    struct TxRecorder {
        events: Mutex<Vec<(i64, bool)>>,
    }

    impl TxListener for TxRecorder {
        fn set_tx(&self, trx: i64, ptt: bool) {
            self.events.lock().push((trx, ptt));
        }
    }

    #[test]
    fn notifications_update_status() {
        let (client, _requests) = TciClient::offline();
        client.inject_frame(
            "trx:0,true;tune:1,true;modulation:0,USB;mute:true;drive:0,40;\
             vfo:0,0,14074000;vfo:0,1,7074000;rx_filter_band:1,-500,500;volume:-12;",
        );

        let status = client.status();
        assert_eq!(status.tx.get(&0), Some(&true));
        assert_eq!(status.tune.get(&1), Some(&true));
        assert_eq!(status.modes.get(&0).map(String::as_str), Some("usb"));
        assert_eq!(status.mute, Some(true));
        assert_eq!(status.drive, Some(40));
        assert_eq!(status.frequencies, HashMap::from([(0, 14_074_000)]));
        assert_eq!(status.filters.get(&1), Some(&(-500, 500)));
        assert_eq!(status.volume, Some(-12));

        client.inject_frame("drive:55;");
        assert_eq!(client.status().drive, Some(55));
    }

    #[test]
    fn unchanged_values_are_not_broadcast() {
        let (client, _requests) = TciClient::offline();
        let recorder = Arc::new(TxRecorder::default());
        client.listen_tx(Arc::downgrade(&recorder) as Weak<dyn TxListener>);

        client.inject_frame("trx:0,false;trx:0,false;trx:1,true;trx:0,true;trx:0,true;bogus:1;trx:x,true;");
        assert_eq!(*recorder.events.lock(), vec![(0, false), (1, true), (0, true)]);
    }

    #[test]
    fn requests_need_a_connection() {
        let (client, mut requests) = TciClient::offline();
        client.set_tx(0, true);
        assert!(requests.try_recv().is_err());

        client.inject_connected(true);
        client.set_tx(0, true);
        client.set_mode(1, "cw");
        client.set_drive(30);
        client.set_vfo_frequency(0, 7_030_000);
        client.set_dds(0, 7_030_000);
        client.set_rx_filter_band(1, 300, 2700);
        client.set_volume(-20);
        let sent: Vec<String> = std::iter::from_fn(|| requests.try_recv().ok())
            .map(|m| m.to_string())
            .collect();
        assert_eq!(
            sent,
            vec![
                "trx:0,true;",
                "modulation:1,cw;",
                "drive:30;",
                "vfo:0,0,7030000;",
                "dds:0,7030000;",
                "rx_filter_band:1,300,2700;",
                "volume:-20;"
            ]
        );
    }

    #[tokio::test]
    async fn address_gets_default_port() {
        let stop = CancellationToken::new();
        let client = TciClient::open("sdr", &stop);
        assert_eq!(client.address(), "sdr:40001");

        stop.cancel();
        assert!(client.is_closed());
    }

    /// Accept WebSocket sessions on a local port; each one is handed to the test.
    async fn serve_websockets() -> (String, mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(socket) = accept_async(stream).await else {
                    continue;
                };
                if tx.send(socket).is_err() {
                    return;
                }
            }
        });
        (address, rx)
    }

    async fn next_text(socket: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match socket.next().await {
                Some(Ok(Frame::Text(text))) => return text.to_string(),
                Some(Ok(_)) => {}
                other => panic!("no text frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn talks_to_a_tci_server() {
        let (address, mut sessions) = serve_websockets().await;
        let stop = CancellationToken::new();
        let client = TciClient::open_with_retry(&address, Duration::from_millis(50), &stop);
        let enabled = Arc::new(EnableRecorder::default());
        client.listen_enabled(Arc::downgrade(&enabled) as Weak<dyn Enabler>);

        let mut server = sessions.recv().await.unwrap();
        server
            .send(Frame::text("trx:0,false;modulation:0,USB;drive:0,40;vfo:0,0,14250000;"))
            .await
            .unwrap();
        wait_until(|| client.status().frequencies.get(&0) == Some(&14_250_000)).await;
        let status = client.status();
        assert!(client.is_connected());
        assert_eq!(status.tx.get(&0), Some(&false));
        assert_eq!(status.modes.get(&0).map(String::as_str), Some("usb"));
        assert_eq!(status.drive, Some(40));

        client.set_mode(0, "cw");
        assert_eq!(next_text(&mut server).await, "modulation:0,cw;");
        client.set_drive(25);
        assert_eq!(next_text(&mut server).await, "drive:25;");

        // The server goes away; the client comes back with a fresh status.
        server.close(None).await.unwrap();
        drop(server);
        let mut server = sessions.recv().await.unwrap();
        wait_until(|| client.is_connected()).await;
        assert_eq!(*enabled.events.lock(), vec![true, false, true]);
        server.send(Frame::text("modulation:0,LSB;")).await.unwrap();
        wait_until(|| client.status().modes.get(&0).map(String::as_str) == Some("lsb")).await;
        assert_eq!(client.status().drive, None);

        client.set_tx(0, true);
        assert_eq!(next_text(&mut server).await, "trx:0,true;");

        stop.cancel();
        wait_until(|| !client.is_connected()).await;
    }
}
