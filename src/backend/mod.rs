use crate::button::Enabler;
use crate::error::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A typed observer list for one kind of notification.
///
/// Observers are held weakly; buttons that were dropped are pruned on the next
/// notification. Callbacks run outside the list lock, so an observer may
/// register further observers while being notified.
pub struct Observers<L: ?Sized> {
    list: Mutex<Vec<Weak<L>>>,
}

impl<L: ?Sized> Default for Observers<L> {
    fn default() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Observers<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Weak<L>) {
        self.list.lock().push(observer);
    }

    pub fn notify(&self, f: impl Fn(&L)) {
        for observer in self.live() {
            f(&observer);
        }
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<Arc<L>> {
        let mut list = self.list.lock();
        list.retain(|observer| observer.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    }
}

/// `host:port` with the port filled in when the address has none; an empty
/// address means localhost.
pub fn with_default_port(address: &str, port: u16) -> String {
    let address = address.trim();
    if address.is_empty() {
        return format!("localhost:{port}");
    }
    match address.rsplit_once(':') {
        Some((host, "")) => format!("{host}:{port}"),
        Some((host, _)) if host.is_empty() => format!("localhost{address}"),
        Some(_) => address.to_string(),
        None => format!("{address}:{port}"),
    }
}

/// Connected flag of a backend client plus the buttons that grey out with it.
#[derive(Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    enablers: Observers<dyn Enabler>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn listen(&self, enabler: Weak<dyn Enabler>) {
        self.enablers.add(enabler);
    }

    /// Update the flag; enablers are only told about actual changes.
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        self.enablers.notify(|enabler| enabler.enable(connected));
    }
}

/// One reconnectable transport of a backend client.
pub trait Link: Send + Sync + 'static {
    type Session: Send;

    /// Human readable peer description for logs.
    fn name(&self) -> &str;

    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;

    /// Drive a live session until the peer goes away.
    fn serve(&self, session: Self::Session) -> impl Future<Output = Result<()>> + Send;
}

/// Keep a link open until `stop` is cancelled.
///
/// Retries happen at a fixed interval, forever. Every transition between
/// connected and disconnected is published through `state`.
pub async fn keep_open<L: Link>(
    link: Arc<L>,
    state: Arc<ConnectionState>,
    retry_interval: Duration,
    stop: CancellationToken,
) {
    loop {
        let connected = tokio::select! {
            () = stop.cancelled() => break,
            result = link.connect() => result,
        };

        match connected {
            Ok(session) => {
                info!("connected to {}", link.name());
                state.set_connected(true);

                let served = tokio::select! {
                    () = stop.cancelled() => None,
                    result = link.serve(session) => Some(result),
                };
                state.set_connected(false);

                match served {
                    None => break,
                    Some(Ok(())) => warn!("connection lost to {}, waiting for retry", link.name()),
                    Some(Err(e)) => {
                        warn!("connection lost to {}, waiting for retry: {e}", link.name());
                    }
                }
            }
            Err(e) => warn!("cannot connect to {}, waiting for retry: {e}", link.name()),
        }

        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(retry_interval) => {
                info!("retrying to connect to {}", link.name());
            }
        }
    }

    state.set_connected(false);
    info!("connection to {} closed", link.name());
}
