use crate::backend::{keep_open, ConnectionState, Link, Observers};
use crate::button::Enabler;
use crate::error::{DeckError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KIND: &str = "pulse";
const PACTL: &str = "pactl";

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuteKind {
    Sink,
    Source,
    /// A playback stream.
    SinkInput,
    /// A recording stream.
    SourceOutput,
}

impl MuteKind {
    fn as_str(self) -> &'static str {
        match self {
            MuteKind::Sink => "sink",
            MuteKind::Source => "source",
            MuteKind::SinkInput => "sink-input",
            MuteKind::SourceOutput => "source-output",
        }
    }

    /// Streams come and go, so they are addressed by media name and looked
    /// up by listing them.
    fn is_stream(self) -> bool {
        matches!(self, MuteKind::SinkInput | MuteKind::SourceOutput)
    }
}

/// A device addressed by its name, or a stream addressed by its media name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MuteTarget {
    pub kind: MuteKind,
    pub name: String,
}

impl MuteTarget {
    pub fn sink(name: impl Into<String>) -> Self {
        Self {
            kind: MuteKind::Sink,
            name: name.into(),
        }
    }

    pub fn source(name: impl Into<String>) -> Self {
        Self {
            kind: MuteKind::Source,
            name: name.into(),
        }
    }

    pub fn sink_input(media_name: impl Into<String>) -> Self {
        Self {
            kind: MuteKind::SinkInput,
            name: media_name.into(),
        }
    }

    pub fn source_output(media_name: impl Into<String>) -> Self {
        Self {
            kind: MuteKind::SourceOutput,
            name: media_name.into(),
        }
    }
}

impl fmt::Display for MuteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.name)
    }
}

pub trait MuteListener: Send + Sync {
    fn set_mute(&self, target: &MuteTarget, muted: bool);
}

#[derive(Default)]
struct Shared {
    /// Watched targets with their last known mute state.
    mutes: Mutex<HashMap<MuteTarget, Option<bool>>>,
    listeners: Observers<dyn MuteListener>,
}

impl Shared {
    fn set_mute(&self, target: &MuteTarget, muted: bool) {
        let previous = self.mutes.lock().insert(target.clone(), Some(muted));
        if previous != Some(Some(muted)) {
            self.listeners.notify(|l| l.set_mute(target, muted));
        }
    }

    fn watched(&self, kind: Option<MuteKind>) -> Vec<MuteTarget> {
        self.mutes
            .lock()
            .keys()
            .filter(|target| kind.map_or(true, |kind| target.kind == kind))
            .cloned()
            .collect()
    }
}

enum Request {
    Refresh(MuteTarget),
    Toggle(MuteTarget),
}

/// Client of a PulseAudio (or PipeWire-pulse) server, driven through `pactl`.
pub struct PulseClient {
    server: Option<String>,
    state: Arc<ConnectionState>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Request>,
    stop: CancellationToken,
}

impl PulseClient {
    /// Start a client for `server`, or the local default server if `None`.
    /// The client stops when `stop` is cancelled or on [`close`](Self::close).
    /// Must be called from within a tokio runtime.
    pub fn open(server: Option<&str>, stop: &CancellationToken) -> Arc<Self> {
        let server = server.filter(|s| !s.is_empty()).map(str::to_string);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ConnectionState::new());
        let shared = Arc::new(Shared::default());
        let stop = stop.child_token();

        let link = Arc::new(PactlLink {
            name: match &server {
                Some(server) => format!("pulseaudio at {server}"),
                None => "pulseaudio".to_string(),
            },
            pactl: Pactl {
                server: server.clone(),
            },
            shared: shared.clone(),
            requests: tokio::sync::Mutex::new(request_rx),
        });
        tokio::spawn(keep_open(link, state.clone(), RETRY_INTERVAL, stop.clone()));

        Arc::new(Self {
            server,
            state,
            shared,
            requests,
            stop,
        })
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
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

    pub fn listen_mute(&self, listener: Weak<dyn MuteListener>) {
        self.shared.listeners.add(listener);
    }

    /// Track the mute state of a target from now on.
    pub fn watch(&self, target: &MuteTarget) {
        self.shared.mutes.lock().entry(target.clone()).or_insert(None);
        let _ = self.requests.send(Request::Refresh(target.clone()));
    }

    /// Last known mute state; `None` until the server reported it.
    pub fn is_muted(&self, target: &MuteTarget) -> Option<bool> {
        self.shared.mutes.lock().get(target).copied().flatten()
    }

    pub fn toggle_mute(&self, target: &MuteTarget) {
        if !self.is_connected() {
            warn!("cannot toggle mute of {target}: pulseaudio is not connected");
            return;
        }
        if self.requests.send(Request::Toggle(target.clone())).is_err() {
            debug!("pulseaudio session is gone");
        }
    }
}

#[cfg(test)]
impl PulseClient {
    pub(crate) fn offline() -> Arc<Self> {
        let (requests, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            server: None,
            state: Arc::new(ConnectionState::new()),
            shared: Arc::new(Shared::default()),
            requests,
            stop: CancellationToken::new(),
        })
    }

    pub(crate) fn inject_connected(&self, connected: bool) {
        self.state.set_connected(connected);
    }

    pub(crate) fn inject_mute(&self, target: &MuteTarget, muted: bool) {
        self.shared.set_mute(target, muted);
    }
}

/// Runs `pactl` against one server.
struct Pactl {
    server: Option<String>,
}

impl Pactl {
    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(PACTL);
        if let Some(server) = &self.server {
            command.arg(format!("--server={server}"));
        }
        command
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = timeout(COMMAND_TIMEOUT, self.command(args).output())
            .await
            .map_err(|_| DeckError::connection(KIND, format!("pactl {} timed out", args.join(" "))))?
            .map_err(|e| DeckError::connection(KIND, format!("cannot run pactl: {e}")))?;
        if !output.status.success() {
            return Err(DeckError::protocol(
                KIND,
                format!(
                    "pactl {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `None` if the target is a stream that does not exist right now.
    async fn is_muted(&self, target: &MuteTarget) -> Result<Option<bool>> {
        if target.kind.is_stream() {
            return Ok(self.find_stream(target).await?.map(|stream| stream.muted));
        }
        let command = format!("get-{}-mute", target.kind.as_str());
        let output = self.run(&[&command, &target.name]).await?;
        parse_mute(&output).map(Some)
    }

    /// Returns `false` if the target is a stream that does not exist.
    async fn toggle_mute(&self, target: &MuteTarget) -> Result<bool> {
        let command = format!("set-{}-mute", target.kind.as_str());
        if !target.kind.is_stream() {
            self.run(&[&command, &target.name, "toggle"]).await?;
            return Ok(true);
        }
        let Some(stream) = self.find_stream(target).await? else {
            return Ok(false);
        };
        self.run(&[&command, &stream.index.to_string(), "toggle"]).await?;
        Ok(true)
    }

    async fn find_stream(&self, target: &MuteTarget) -> Result<Option<Stream>> {
        let list = format!("{}s", target.kind.as_str());
        let output = self.run(&["list", &list]).await?;
        Ok(parse_streams(&output)
            .into_iter()
            .find(|stream| stream.media_name.as_deref() == Some(target.name.as_str())))
    }
}

struct PactlSession {
    // Killed when the session is dropped.
    _subscription: Child,
    events: Lines<BufReader<ChildStdout>>,
}

struct PactlLink {
    name: String,
    pactl: Pactl,
    shared: Arc<Shared>,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Request>>,
}

impl Link for PactlLink {
    type Session = PactlSession;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<PactlSession> {
        self.pactl.run(&["info"]).await?;

        let mut subscription = self
            .pactl
            .command(&["subscribe"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DeckError::connection(KIND, format!("cannot run pactl subscribe: {e}")))?;
        let stdout = subscription
            .stdout
            .take()
            .ok_or_else(|| DeckError::connection(KIND, "pactl subscribe has no output"))?;

        Ok(PactlSession {
            _subscription: subscription,
            events: BufReader::new(stdout).lines(),
        })
    }

    async fn serve(&self, mut session: PactlSession) -> Result<()> {
        let mut requests = self.requests.lock().await;
        while requests.try_recv().is_ok() {}
        self.refresh_all(None).await;

        loop {
            tokio::select! {
                line = session.events.next_line() => match line? {
                    Some(line) => {
                        if let Some(kind) = parse_event(&line) {
                            self.refresh_all(Some(kind)).await;
                        }
                    }
                    None => return Err(DeckError::connection(KIND, "pactl subscribe ended")),
                },
                request = requests.recv() => match request {
                    Some(Request::Refresh(target)) => self.refresh(&target).await,
                    Some(Request::Toggle(target)) => {
                        match self.pactl.toggle_mute(&target).await {
                            Ok(true) => {}
                            Ok(false) => debug!("cannot toggle mute state of {target}: no such stream"),
                            Err(e) => warn!("cannot toggle mute state of {target}: {e}"),
                        }
                        self.refresh(&target).await;
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

impl PactlLink {
    async fn refresh_all(&self, kind: Option<MuteKind>) {
        for target in self.shared.watched(kind) {
            self.refresh(&target).await;
        }
    }

    async fn refresh(&self, target: &MuteTarget) {
        match self.pactl.is_muted(target).await {
            Ok(Some(muted)) => self.shared.set_mute(target, muted),
            Ok(None) => debug!("{target} is not playing"),
            Err(e) => warn!("cannot get mute state of {target}: {e}"),
        }
    }
}

/// One entry of `pactl list sink-inputs` or `pactl list source-outputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub index: u32,
    pub muted: bool,
    pub media_name: Option<String>,
}

/// Streams of a `pactl list` output. Entries start with an unindented
/// header like `Sink Input #42`; entries without a mute state are skipped.
pub fn parse_streams(output: &str) -> Vec<Stream> {
    let mut streams = Vec::new();
    let mut current: Option<(u32, Option<bool>, Option<String>)> = None;
    let mut finish = |entry: Option<(u32, Option<bool>, Option<String>)>| {
        if let Some((index, Some(muted), media_name)) = entry {
            streams.push(Stream {
                index,
                muted,
                media_name,
            });
        }
    };

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            let index = line.split_once('#').and_then(|(_, index)| index.trim().parse().ok());
            finish(current.take());
            current = index.map(|index| (index, None, None));
            continue;
        }
        let Some((_, muted, media_name)) = current.as_mut() else {
            continue;
        };
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Mute:") {
            *muted = match value.trim() {
                "yes" => Some(true),
                "no" => Some(false),
                _ => None,
            };
        } else if let Some(value) = line.strip_prefix("media.name = ") {
            *media_name = Some(value.trim().trim_matches('"').to_string());
        }
    }
    finish(current);
    streams
}

/// Device or stream kind affected by a `pactl subscribe` line; removals are
/// ignored.
///
/// Lines look like `Event 'change' on sink #3`.
pub fn parse_event(line: &str) -> Option<MuteKind> {
    let rest = line.trim().strip_prefix("Event '")?;
    let (event, rest) = rest.split_once('\'')?;
    if event == "remove" {
        return None;
    }
    let facility = rest.trim_start().strip_prefix("on ")?.split_whitespace().next()?;
    match facility {
        "sink" => Some(MuteKind::Sink),
        "source" => Some(MuteKind::Source),
        "sink-input" => Some(MuteKind::SinkInput),
        "source-output" => Some(MuteKind::SourceOutput),
        _ => None,
    }
}

/// Output of `pactl get-sink-mute`, e.g. `Mute: yes`.
pub fn parse_mute(output: &str) -> Result<bool> {
    let value = output
        .trim()
        .strip_prefix("Mute:")
        .map(str::trim)
        .ok_or_else(|| DeckError::protocol(KIND, format!("unexpected mute state '{}'", output.trim())))?;
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(DeckError::protocol(KIND, format!("unexpected mute state '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MuteRecorder {
        events: Mutex<Vec<(MuteTarget, bool)>>,
    }

    impl MuteListener for MuteRecorder {
        fn set_mute(&self, target: &MuteTarget, muted: bool) {
            self.events.lock().push((target.clone(), muted));
        }
    }

    #[test]
    fn subscribe_lines_are_parsed() {
        assert_eq!(parse_event("Event 'change' on sink #0"), Some(MuteKind::Sink));
        assert_eq!(parse_event("Event 'new' on source #12\n"), Some(MuteKind::Source));
        assert_eq!(parse_event("Event 'remove' on sink #0"), None);
        assert_eq!(parse_event("Event 'change' on sink-input #7"), Some(MuteKind::SinkInput));
        assert_eq!(parse_event("Event 'new' on source-output #3"), Some(MuteKind::SourceOutput));
        assert_eq!(parse_event("Event 'remove' on sink-input #7"), None);
        assert_eq!(parse_event("Event 'change' on card #1"), None);
        assert_eq!(parse_event("Event 'change' on server #-1"), None);
        assert_eq!(parse_event("garbage"), None);
    }

    #[test]
    fn mute_output_is_parsed() {
        assert!(parse_mute("Mute: yes\n").unwrap());
        assert!(!parse_mute("Mute: no").unwrap());
        assert!(parse_mute("Mute: maybe").is_err());
        assert!(parse_mute("").is_err());
    }

    #[test]
    fn changes_are_broadcast_once() {
        let client = PulseClient::offline();
        let recorder = Arc::new(MuteRecorder::default());
        client.listen_mute(Arc::downgrade(&recorder) as Weak<dyn MuteListener>);
        let mic = MuteTarget::source("mic");

        client.watch(&mic);
        assert_eq!(client.is_muted(&mic), None);

        client.inject_mute(&mic, true);
        client.inject_mute(&mic, true);
        client.inject_mute(&mic, false);

        assert_eq!(client.is_muted(&mic), Some(false));
        assert_eq!(
            *recorder.events.lock(),
            vec![(mic.clone(), true), (mic.clone(), false)]
        );
        assert_eq!(client.shared.watched(Some(MuteKind::Source)), vec![mic]);
        assert!(client.shared.watched(Some(MuteKind::Sink)).is_empty());
    }

    #[test]
    fn server_flag_is_passed() {
        let pactl = Pactl {
            server: Some("tcp:studio".into()),
        };
        let command = pactl.command(&["info"]);
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, ["--server=tcp:studio", "info"]);
    }

    #[test]
    fn streams_are_listed_by_media_name() {
        let output = "\
Sink Input #42
\tDriver: protocol-native.c
\tMute: no
\tProperties:
\t\tmedia.name = \"WSJT-X\"
\t\tapplication.name = \"wsjtx\"

Sink Input #43
\tMute: yes
\tProperties:
\t\tapplication.name = \"speech-dispatcher\"
Sink Input #44
\tProperties:
\t\tmedia.name = \"broken\"
";
        assert_eq!(
            parse_streams(output),
            vec![
                Stream {
                    index: 42,
                    muted: false,
                    media_name: Some("WSJT-X".to_string()),
                },
                Stream {
                    index: 43,
                    muted: true,
                    media_name: None,
                },
            ]
        );
        assert!(parse_streams("").is_empty());
    }

    #[test]
    fn streams_are_watched_by_kind() {
        let client = PulseClient::offline();
        let playback = MuteTarget::sink_input("WSJT-X");
        client.watch(&playback);
        client.watch(&MuteTarget::sink("speaker"));

        assert_eq!(client.shared.watched(Some(MuteKind::SinkInput)), vec![playback.clone()]);
        assert!(client.shared.watched(Some(MuteKind::SourceOutput)).is_empty());
        assert_eq!(playback.to_string(), "sink-input WSJT-X");
    }

    #[tokio::test]
    async fn stopping_the_parent_closes_the_client() {
        let stop = CancellationToken::new();
        let client = PulseClient::open(Some("tcp:127.0.0.1:1"), &stop);
        assert!(!client.is_closed());
        stop.cancel();
        assert!(client.is_closed());
    }
}
