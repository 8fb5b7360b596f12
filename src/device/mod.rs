pub mod input;

use crate::error::{DeckError, Result};
use crate::event::Key;
use elgato_streamdeck::info::Kind;
use elgato_streamdeck::StreamDeck;
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The key grid the deck drives.
pub trait Device: Send {
    fn close(&mut self) -> Result<()>;

    fn id(&self) -> String;

    fn serial(&self) -> String;

    fn firmware_version(&self) -> String;

    /// Edge length of a key image in pixels.
    fn pixels(&self) -> u32;

    fn rows(&self) -> usize;

    fn columns(&self) -> usize;

    fn clear(&mut self) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn set_brightness(&mut self, percent: u8) -> Result<()>;

    fn set_image(&mut self, index: usize, image: &RgbaImage) -> Result<()>;

    /// Start reading keys; the stream ends when the device goes away.
    fn read_keys(&mut self) -> Result<mpsc::Receiver<Key>>;
}

/// An Elgato Stream Deck attached over USB HID.
pub struct StreamDeckDevice {
    deck: Arc<Mutex<StreamDeck>>,
    kind: Kind,
    serial: String,
    firmware_version: String,
}

impl StreamDeckDevice {
    /// Open the first Stream Deck, or the one with the given serial.
    ///
    /// # Errors
    /// Returns `DeckError::NoDevice` / `DeckError::DeviceNotFound` if nothing
    /// matches, or `DeckError::Hid` / `DeckError::Device` on HID failures.
    pub fn open(serial: Option<&str>) -> Result<Self> {
        let hid = elgato_streamdeck::new_hidapi().map_err(|e| DeckError::Hid(e.to_string()))?;

        let devices = elgato_streamdeck::list_devices(&hid);
        if devices.is_empty() {
            return Err(DeckError::NoDevice);
        }
        info!("found {} Stream Deck devices", devices.len());

        let (kind, serial) = match serial.filter(|s| !s.is_empty()) {
            Some(wanted) => devices
                .iter()
                .find(|(_, s)| s == wanted)
                .cloned()
                .ok_or_else(|| DeckError::DeviceNotFound(wanted.to_string()))?,
            None => devices[0].clone(),
        };

        let deck =
            StreamDeck::connect(&hid, kind, &serial).map_err(|e| DeckError::Device(e.to_string()))?;
        deck.reset()
            .map_err(|e| DeckError::Device(format!("cannot reset Stream Deck: {e}")))?;

        let firmware_version = deck.firmware_version().unwrap_or_else(|e| {
            warn!("cannot read firmware version from Stream Deck with serial {serial}: {e}");
            "n/a".to_string()
        });

        Ok(Self {
            deck: Arc::new(Mutex::new(deck)),
            kind,
            serial,
            firmware_version,
        })
    }
}

impl Device for StreamDeckDevice {
    fn close(&mut self) -> Result<()> {
        // The HID handle itself is released on drop.
        self.clear()
    }

    fn id(&self) -> String {
        format!("{:?}", self.kind)
    }

    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn firmware_version(&self) -> String {
        self.firmware_version.clone()
    }

    fn pixels(&self) -> u32 {
        self.kind.key_image_format().size.0 as u32
    }

    fn rows(&self) -> usize {
        usize::from(self.kind.row_count())
    }

    fn columns(&self) -> usize {
        usize::from(self.kind.column_count())
    }

    fn clear(&mut self) -> Result<()> {
        let deck = self.deck.lock();
        deck.clear_all_button_images()
            .and_then(|()| deck.flush())
            .map_err(|e| DeckError::Device(e.to_string()))
    }

    fn reset(&mut self) -> Result<()> {
        self.deck
            .lock()
            .reset()
            .map_err(|e| DeckError::Device(e.to_string()))
    }

    fn set_brightness(&mut self, percent: u8) -> Result<()> {
        self.deck
            .lock()
            .set_brightness(percent.min(100))
            .map_err(|e| DeckError::Device(e.to_string()))
    }

    fn set_image(&mut self, index: usize, image: &RgbaImage) -> Result<()> {
        let key = u8::try_from(index).map_err(|_| DeckError::InvalidIndex {
            index,
            count: self.rows() * self.columns(),
        })?;
        let deck = self.deck.lock();
        deck.set_button_image(key, DynamicImage::ImageRgba8(image.clone()))
            .and_then(|()| deck.flush())
            .map_err(|e| DeckError::Device(e.to_string()))
    }

    fn read_keys(&mut self) -> Result<mpsc::Receiver<Key>> {
        let (tx, rx) = mpsc::channel(input::KEY_BUFFER);
        input::spawn_reader(self.deck.clone(), self.rows() * self.columns(), tx)?;
        Ok(rx)
    }
}
