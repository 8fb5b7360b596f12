use crate::backend::{keep_open, with_default_port, ConnectionState, Link, Observers};
use crate::button::Enabler;
use crate::error::{DeckError, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KIND: &str = "hamlib";

pub const DEFAULT_PORT: u16 = 4532;
pub const POLLING_INTERVAL: Duration = Duration::from_millis(500);
pub const POLLING_TIMEOUT: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub trait ModeListener: Send + Sync {
    fn set_mode(&self, mode: &str);
}

pub trait FrequencyListener: Send + Sync {
    fn set_frequency(&self, frequency: u64);
}

pub trait PowerLevelListener: Send + Sync {
    fn set_power_level(&self, level: f64);
}

pub trait PttListener: Send + Sync {
    fn set_ptt(&self, ptt: bool);
}

pub trait VfoListener: Send + Sync {
    fn set_vfo(&self, vfo: &str);
}

/// Last polled values; `None` until the radio reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RigStatus {
    pub vfo: Option<String>,
    pub frequency: Option<u64>,
    pub mode: Option<String>,
    pub power_level: Option<f64>,
    pub ptt: Option<bool>,
}

#[derive(Default)]
struct Shared {
    status: Mutex<RigStatus>,
    modes: Observers<dyn ModeListener>,
    frequencies: Observers<dyn FrequencyListener>,
    power_levels: Observers<dyn PowerLevelListener>,
    ptts: Observers<dyn PttListener>,
    vfos: Observers<dyn VfoListener>,
}

impl Shared {
    /// Store a polled value; returns `true` if it differs from the last one.
    fn update<T: PartialEq>(&self, field: impl FnOnce(&mut RigStatus) -> &mut Option<T>, value: T) -> bool {
        let mut status = self.status.lock();
        let slot = field(&mut *status);
        if slot.as_ref() == Some(&value) {
            return false;
        }
        *slot = Some(value);
        true
    }

    fn set_vfo(&self, vfo: String) {
        if self.update(|s| &mut s.vfo, vfo.clone()) {
            self.vfos.notify(|l| l.set_vfo(&vfo));
        }
    }

    fn set_frequency(&self, frequency: u64) {
        if self.update(|s| &mut s.frequency, frequency) {
            self.frequencies.notify(|l| l.set_frequency(frequency));
        }
    }

    fn set_mode(&self, mode: String) {
        if self.update(|s| &mut s.mode, mode.clone()) {
            self.modes.notify(|l| l.set_mode(&mode));
        }
    }

    fn set_power_level(&self, level: f64) {
        if self.update(|s| &mut s.power_level, level) {
            self.power_levels.notify(|l| l.set_power_level(level));
        }
    }

    fn set_ptt(&self, ptt: bool) {
        if self.update(|s| &mut s.ptt, ptt) {
            self.ptts.notify(|l| l.set_ptt(ptt));
        }
    }
}

/// Client of a rigctld daemon.
///
/// A background task keeps the TCP connection open, polls the radio and
/// executes queued requests. Requests issued while disconnected are dropped.
pub struct HamlibClient {
    address: String,
    state: Arc<ConnectionState>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
}

impl HamlibClient {
    /// Start a client that keeps the connection to `address` open until
    /// `close` is called or `stop` is cancelled. Must be called from within
    /// a tokio runtime.
    pub fn open(address: &str, stop: &CancellationToken) -> Arc<Self> {
        let address = with_default_port(address, DEFAULT_PORT);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ConnectionState::new());
        let shared = Arc::new(Shared::default());
        let stop = stop.child_token();

        let link = Arc::new(RigctlLink {
            name: format!("hamlib at {address}"),
            address: address.clone(),
            shared: shared.clone(),
            requests: tokio::sync::Mutex::new(request_rx),
        });
        tokio::spawn(keep_open(link, state.clone(), RETRY_INTERVAL, stop.clone()));

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

    pub fn status(&self) -> RigStatus {
        self.shared.status.lock().clone()
    }

    /// Stop the supervisor; safe to call more than once.
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn listen_enabled(&self, listener: Weak<dyn Enabler>) {
        self.state.listen(listener);
    }

    pub fn listen_mode(&self, listener: Weak<dyn ModeListener>) {
        self.shared.modes.add(listener);
    }

    pub fn listen_frequency(&self, listener: Weak<dyn FrequencyListener>) {
        self.shared.frequencies.add(listener);
    }

    pub fn listen_power_level(&self, listener: Weak<dyn PowerLevelListener>) {
        self.shared.power_levels.add(listener);
    }

    pub fn listen_ptt(&self, listener: Weak<dyn PttListener>) {
        self.shared.ptts.add(listener);
    }

    pub fn listen_vfo(&self, listener: Weak<dyn VfoListener>) {
        self.shared.vfos.add(listener);
    }

    /// Set mode and passband; a bandwidth of 0 keeps the radio's default.
    pub fn set_mode(&self, mode: &str, bandwidth: i64) {
        self.request(format!("M {mode} {bandwidth}"));
    }

    pub fn set_ptt(&self, ptt: bool) {
        self.request(format!("T {}", u8::from(ptt)));
    }

    pub fn set_vfo(&self, vfo: &str) {
        self.request(format!("V {vfo}"));
    }

    /// Tune the current VFO to `frequency` Hz.
    pub fn set_frequency(&self, frequency: u64) {
        self.request(format!("F {frequency}"));
    }

    /// A rigctld VFO operation such as `BAND_UP`.
    pub fn vfo_op(&self, op: &str) {
        self.request(format!("G {op}"));
    }

    /// RF power level in [0, 1].
    pub fn set_power_level(&self, level: f64) {
        self.request(format!("L RFPOWER {level:.3}"));
    }

    /// Any rigctld set command with its arguments.
    pub fn set(&self, command: &str, args: &[String]) {
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.request(line);
    }

    fn request(&self, line: String) {
        if !self.is_connected() {
            warn!("cannot send '{line}' to {}: not connected", self.address);
            return;
        }
        if self.requests.send(line).is_err() {
            debug!("hamlib session of {} is gone", self.address);
        }
    }
}

#[cfg(test)]
impl HamlibClient {
    /// A client without a supervisor; requests end up in the returned receiver.
    pub(crate) fn offline(address: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            address: address.to_string(),
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

    pub(crate) fn inject_mode(&self, mode: &str) {
        self.shared.set_mode(mode.to_string());
    }

    pub(crate) fn inject_frequency(&self, frequency: u64) {
        self.shared.set_frequency(frequency);
    }

    pub(crate) fn inject_ptt(&self, ptt: bool) {
        self.shared.set_ptt(ptt);
    }

    pub(crate) fn inject_vfo(&self, vfo: &str) {
        self.shared.set_vfo(vfo.to_string());
    }

    pub(crate) fn inject_power_level(&self, level: f64) {
        self.shared.set_power_level(level);
    }
}

enum Reply {
    Values(Vec<String>),
    Error(i32),
}

struct RigctlLink {
    name: String,
    address: String,
    shared: Arc<Shared>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

type RigctlSession = BufStream<TcpStream>;

impl Link for RigctlLink {
    type Session = RigctlSession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<RigctlSession> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| DeckError::connection(KIND, e))?;
        stream.set_nodelay(true)?;
        Ok(BufStream::new(stream))
    }

    async fn serve(&self, mut session: RigctlSession) -> Result<()> {
        let mut requests = self.requests.lock().await;
        let mut stale = 0;
        while requests.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("dropped {stale} stale requests for {}", self.name);
        }
        *self.shared.status.lock() = RigStatus::default();

        let mut poll = tokio::time::interval(POLLING_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    timeout(POLLING_TIMEOUT, self.poll(&mut session))
                        .await
                        .map_err(|_| DeckError::connection(KIND, "polling timed out"))??;
                }
                request = requests.recv() => {
                    let Some(request) = request else {
                        return Ok(());
                    };
                    self.execute(&mut session, &request).await?;
                    poll.reset_immediately();
                }
            }
        }
    }
}

impl RigctlLink {
    async fn poll(&self, session: &mut RigctlSession) -> Result<()> {
        if let Some(values) = query(session, "v", 1).await? {
            self.shared.set_vfo(values[0].clone());
        }
        if let Some(values) = query(session, "f", 1).await? {
            match values[0].parse::<f64>() {
                Ok(frequency) => self.shared.set_frequency(frequency.round() as u64),
                Err(_) => debug!("invalid frequency '{}'", values[0]),
            }
        }
        if let Some(values) = query(session, "m", 2).await? {
            self.shared.set_mode(values[0].clone());
        }
        if let Some(values) = query(session, "l RFPOWER", 1).await? {
            match values[0].parse::<f64>() {
                Ok(level) => self.shared.set_power_level(level),
                Err(_) => debug!("invalid power level '{}'", values[0]),
            }
        }
        if let Some(values) = query(session, "t", 1).await? {
            match values[0].parse::<i32>() {
                Ok(ptt) => self.shared.set_ptt(ptt != 0),
                Err(_) => debug!("invalid PTT state '{}'", values[0]),
            }
        }
        Ok(())
    }

    async fn execute(&self, session: &mut RigctlSession, request: &str) -> Result<()> {
        debug!("{}: {request}", self.name);
        let reply = timeout(REQUEST_TIMEOUT, transact(session, request, 0))
            .await
            .map_err(|_| DeckError::connection(KIND, format!("'{request}' timed out")))??;
        if let Reply::Error(code) = reply {
            warn!("{} rejected '{request}': RPRT {code}", self.name);
        }
        Ok(())
    }
}

/// A get command; rejected commands (unsupported by the rig) yield `None`.
async fn query(session: &mut RigctlSession, command: &str, lines: usize) -> Result<Option<Vec<String>>> {
    match transact(session, command, lines).await? {
        Reply::Values(values) if values.is_empty() => Ok(None),
        Reply::Values(values) => Ok(Some(values)),
        Reply::Error(code) => {
            debug!("'{command}' failed: RPRT {code}");
            Ok(None)
        }
    }
}

/// Send one command line and read its reply.
///
/// A reply starting with `RPRT` is a status code; anything else is the first
/// of `lines` value lines.
async fn transact(session: &mut RigctlSession, command: &str, lines: usize) -> Result<Reply> {
    session.write_all(command.as_bytes()).await?;
    session.write_all(b"\n").await?;
    session.flush().await?;

    let first = read_line(session).await?;
    if let Some(code) = first.strip_prefix("RPRT") {
        let code: i32 = code
            .trim()
            .parse()
            .map_err(|_| DeckError::protocol(KIND, format!("invalid reply '{first}'")))?;
        return Ok(match code {
            0 => Reply::Values(Vec::new()),
            code => Reply::Error(code),
        });
    }

    let mut values = vec![first];
    while values.len() < lines {
        values.push(read_line(session).await?);
    }
    Ok(Reply::Values(values))
}

async fn read_line(session: &mut RigctlSession) -> Result<String> {
    let mut line = String::new();
    if session.read_line(&mut line).await? == 0 {
        return Err(DeckError::connection(KIND, "connection closed by rigctld"));
    }
    Ok(line.trim_end().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::tests::{wait_until, EnableRecorder};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// A minimal rigctld: answers polls from its state and applies set commands.
    pub(crate) struct FakeRig {
        pub address: String,
        pub mode: Arc<Mutex<String>>,
        pub ptt: Arc<Mutex<bool>>,
        pub commands: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRig {
        pub(crate) async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap().to_string();
            let rig = Self {
                address,
                mode: Arc::new(Mutex::new("USB".to_string())),
                ptt: Arc::new(Mutex::new(false)),
                commands: Arc::new(Mutex::new(Vec::new())),
            };
            let (mode, ptt, commands) = (rig.mode.clone(), rig.ptt.clone(), rig.commands.clone());
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (mode, ptt, commands) = (mode.clone(), ptt.clone(), commands.clone());
                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut lines = BufReader::new(reader).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let reply = answer(&line, &mode, &ptt, &commands);
                            if writer.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            });
            rig
        }
    }

    fn answer(line: &str, mode: &Mutex<String>, ptt: &Mutex<bool>, commands: &Mutex<Vec<String>>) -> String {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["v"] => "RPRT -11\n".to_string(),
            ["f"] => "14074000.000000\n".to_string(),
            ["m"] => format!("{}\n2400\n", mode.lock()),
            ["l", "RFPOWER"] => "0.500000\n".to_string(),
            ["t"] => format!("{}\n", u8::from(*ptt.lock())),
            ["M", new_mode, _] => {
                *mode.lock() = (*new_mode).to_string();
                commands.lock().push(line.to_string());
                "RPRT 0\n".to_string()
            }
            ["T", value] => {
                *ptt.lock() = *value == "1";
                commands.lock().push(line.to_string());
                "RPRT 0\n".to_string()
            }
            _ => {
                commands.lock().push(line.to_string());
                "RPRT -1\n".to_string()
            }
        }
    }

    #[derive(Default)]
    struct ModeRecorder {
        modes: Mutex<Vec<String>>,
    }

    impl ModeListener for ModeRecorder {
        fn set_mode(&self, mode: &str) {
            self.modes.lock().push(mode.to_string());
        }
    }

    #[tokio::test]
    async fn polls_and_sets_mode() {
        let rig = FakeRig::start().await;
        let client = HamlibClient::open(&rig.address, &CancellationToken::new());
        let modes = Arc::new(ModeRecorder::default());
        let enabled = Arc::new(EnableRecorder::default());
        client.listen_mode(Arc::downgrade(&modes) as Weak<dyn ModeListener>);
        client.listen_enabled(Arc::downgrade(&enabled) as Weak<dyn Enabler>);

        wait_until(|| client.status().mode.is_some()).await;
        let status = client.status();
        assert_eq!(status.mode.as_deref(), Some("USB"));
        assert_eq!(status.frequency, Some(14_074_000));
        assert_eq!(status.power_level, Some(0.5));
        assert_eq!(status.ptt, Some(false));
        assert_eq!(status.vfo, None, "unsupported commands are skipped");
        assert_eq!(*enabled.events.lock(), vec![true]);

        client.set_mode("CW", 0);
        wait_until(|| modes.modes.lock().len() == 2).await;
        assert_eq!(*modes.modes.lock(), vec!["USB", "CW"]);
        assert_eq!(*rig.commands.lock(), vec!["M CW 0"]);

        // Rejected commands keep the session alive.
        client.set("U", &["TUNER".to_string(), "1".to_string()]);
        wait_until(|| rig.commands.lock().len() == 2).await;
        client.set_ptt(true);
        wait_until(|| client.status().ptt == Some(true)).await;
        assert!(client.is_connected());

        client.close();
        wait_until(|| !client.is_connected()).await;
        assert_eq!(*enabled.events.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn requests_are_dropped_while_disconnected() {
        let stop = CancellationToken::new();
        let client = HamlibClient::open("127.0.0.1:1", &stop);
        client.set_mode("CW", 0);
        assert!(!client.is_connected());

        stop.cancel();
        assert!(client.is_closed());
    }

    #[test]
    fn unchanged_values_are_not_broadcast() {
        let shared = Shared::default();
        let modes = Arc::new(ModeRecorder::default());
        shared.modes.add(Arc::downgrade(&modes) as Weak<dyn ModeListener>);

        shared.set_mode("USB".into());
        shared.set_mode("USB".into());
        shared.set_mode("LSB".into());

        assert_eq!(*modes.modes.lock(), vec!["USB", "LSB"]);
    }
}
