use crate::error::{DeckError, Result};
use crate::event::Key;
use elgato_streamdeck::{StreamDeck, StreamDeckInput};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the key event channel.
pub const KEY_BUFFER: usize = 32;

/// How long a single HID read may hold the device lock.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Read key states on a dedicated thread and forward them as transitions.
///
/// The thread stops when the receiver is dropped or the device fails; in the
/// latter case dropping the sender closes the key stream.
pub fn spawn_reader(
    deck: Arc<Mutex<StreamDeck>>,
    key_count: usize,
    tx: mpsc::Sender<Key>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("hamdeck-keys".into())
        .spawn(move || read_loop(&deck, key_count, &tx))
        .map(|_| ())
        .map_err(DeckError::Io)
}

fn read_loop(deck: &Mutex<StreamDeck>, key_count: usize, tx: &mpsc::Sender<Key>) {
    let mut states = vec![false; key_count];
    loop {
        if tx.is_closed() {
            debug!("key reader stopped");
            return;
        }

        let input = deck.lock().read_input(Some(POLL_TIMEOUT));
        let input = match input {
            Ok(input) => input,
            Err(e) => {
                warn!("cannot read keys from Stream Deck: {e}");
                return;
            }
        };

        if let StreamDeckInput::ButtonStateChange(buttons) = input {
            for key in transitions(&mut states, &buttons) {
                debug!("key {} {}", key.index, if key.pressed { "down" } else { "up" });
                if tx.blocking_send(key).is_err() {
                    return;
                }
            }
        }
        // Encoders and touch strips are not used.
    }
}

/// Diff the reported key states against the last known ones.
pub fn transitions(states: &mut Vec<bool>, reported: &[bool]) -> Vec<Key> {
    if states.len() < reported.len() {
        states.resize(reported.len(), false);
    }
    reported
        .iter()
        .enumerate()
        .filter_map(|(index, &pressed)| {
            if states[index] == pressed {
                return None;
            }
            states[index] = pressed;
            Some(Key { index, pressed })
        })
        .collect()
}
