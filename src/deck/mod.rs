mod loader;

use crate::button::page::{PageButtonFactory, PageSwitcher};
use crate::button::{Button, ButtonContext, EmptyButton};
use crate::config::schema::ConnectionConfig;
use crate::connection::{ConnectionConfigProvider, Connections};
use crate::device::Device;
use crate::error::{DeckError, Result};
use crate::event::{DeckCommand, Key};
use crate::factory::ButtonFactory;
use crate::page::Page;
use crate::render::{GraphicContext, Theme};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Period of the flashing timer driving `Button::flash`.
pub const FLASHING_INTERVAL: Duration = Duration::from_millis(500);

/// Redraw handle of one slot; posts to the deck loop.
struct SlotContext {
    index: usize,
    tx: mpsc::UnboundedSender<DeckCommand>,
}

impl ButtonContext for SlotContext {
    fn invalidate(&self, redraw_images: bool) {
        let command = DeckCommand::Redraw {
            index: self.index,
            redraw_images,
        };
        if self.tx.send(command).is_err() {
            debug!("deck is gone, redraw of key {} dropped", self.index);
        }
    }
}

enum LoopEvent {
    Key(Key),
    Command(DeckCommand),
    Flash,
}

/// Binds the keys of a device to buttons and keeps their tiles up to date.
///
/// Every slot always holds a button; unused slots hold the empty placeholder.
/// All drawing happens on the deck's own loop, one tile at a time.
pub struct Deck {
    device: Box<dyn Device>,
    gc: GraphicContext,
    buttons: Vec<Arc<dyn Button>>,
    no_button: Arc<dyn Button>,
    flash_on: bool,
    factories: Vec<Box<dyn ButtonFactory>>,
    buttons_per_factory: Vec<usize>,
    start_page_id: String,
    pages: HashMap<String, Page>,
    connections: Connections,
    commands: mpsc::UnboundedSender<DeckCommand>,
    command_rx: mpsc::UnboundedReceiver<DeckCommand>,
}

impl Deck {
    /// Build a deck sized to the device, clear it and draw the empty tiles.
    ///
    /// The `hamdeck.Page` factory is registered first.
    pub fn new(device: Box<dyn Device>, theme: Theme) -> Self {
        let button_count = device.rows() * device.columns();
        let mut gc = GraphicContext::new(device.pixels(), theme);
        let no_button: Arc<dyn Button> = Arc::new(EmptyButton::new(&mut gc));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let mut deck = Self {
            device,
            gc,
            buttons: vec![no_button.clone(); button_count],
            no_button,
            flash_on: false,
            factories: Vec::new(),
            buttons_per_factory: Vec::new(),
            start_page_id: String::new(),
            pages: HashMap::new(),
            connections: Connections::default(),
            commands,
            command_rx,
        };

        let page_factory = PageButtonFactory::new(deck.page_switcher());
        deck.register_factory(Box::new(page_factory));

        if let Err(e) = deck.device.clear() {
            warn!("cannot clear Stream Deck: {e}");
        }
        deck.redraw_all(true);

        deck
    }

    /// Append a factory; factories are asked in registration order.
    pub fn register_factory(&mut self, factory: Box<dyn ButtonFactory>) {
        self.factories.push(factory);
        self.buttons_per_factory.push(0);
    }

    /// Connection table shared with the backend factories.
    ///
    /// It is filled by `read_config`, so factories may be registered before.
    pub fn connections(&self) -> Arc<dyn ConnectionConfigProvider> {
        Arc::new(self.connections.clone())
    }

    pub fn get_connection(&self, name: &str, kind: &str) -> Option<ConnectionConfig> {
        self.connections.get_connection(name, kind)
    }

    pub fn page_switcher(&self) -> PageSwitcher {
        PageSwitcher::new(self.commands.clone())
    }

    pub fn button_count(&self) -> usize {
        self.buttons.len()
    }

    pub fn start_page_id(&self) -> &str {
        &self.start_page_id
    }

    pub fn page(&self, id: &str) -> Option<&Page> {
        self.pages.get(id)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The button currently attached at `index`.
    pub fn button(&self, index: usize) -> Option<&Arc<dyn Button>> {
        self.buttons.get(index)
    }

    /// `true` if the slot holds the empty placeholder.
    pub fn is_empty_slot(&self, index: usize) -> bool {
        self.buttons
            .get(index)
            .is_some_and(|button| self.is_no_button(button))
    }

    fn is_no_button(&self, button: &Arc<dyn Button>) -> bool {
        // Compare data pointers only; vtable pointers of the same type may differ.
        std::ptr::eq(
            Arc::as_ptr(button).cast::<()>(),
            Arc::as_ptr(&self.no_button).cast::<()>(),
        )
    }

    pub fn redraw_all(&mut self, redraw_images: bool) {
        for index in 0..self.buttons.len() {
            self.redraw(index, redraw_images);
        }
    }

    /// Render one slot and push it to the device.
    pub fn redraw(&mut self, index: usize, redraw_images: bool) {
        let Some(button) = self.buttons.get(index).cloned() else {
            return;
        };
        self.gc.reset();
        let image = button.image(&mut self.gc, redraw_images);
        if let Err(e) = self.device.set_image(index, &image) {
            warn!("cannot set image of key {index}: {e}");
        }
    }

    /// Activate a page, replacing every slot.
    ///
    /// # Errors
    /// Returns `DeckError::PageNotFound` if no page has that id.
    pub fn attach_page(&mut self, id: &str) -> Result<()> {
        let page = self
            .pages
            .get(id)
            .cloned()
            .ok_or_else(|| DeckError::PageNotFound(id.to_string()))?;

        debug!("attaching page '{id}'");
        for (index, button) in page.slots().iter().enumerate().take(self.buttons.len()) {
            self.attach(index, button.clone())?;
        }
        Ok(())
    }

    /// Put a button into a slot; `None` leaves the slot empty.
    ///
    /// The previous occupant is detached first.
    ///
    /// # Errors
    /// Returns `DeckError::InvalidIndex` if the slot does not exist.
    pub fn attach(&mut self, index: usize, button: Option<Arc<dyn Button>>) -> Result<()> {
        let previous = self.slot(index)?.clone();
        if !self.is_no_button(&previous) {
            previous.detached();
        }

        self.buttons[index] = match button {
            Some(button) => {
                button.attached(Arc::new(SlotContext {
                    index,
                    tx: self.commands.clone(),
                }));
                button
            }
            None => self.no_button.clone(),
        };

        self.redraw(index, true);
        Ok(())
    }

    /// Empty a slot.
    ///
    /// # Errors
    /// Returns `DeckError::InvalidIndex` if the slot does not exist.
    pub fn detach(&mut self, index: usize) -> Result<()> {
        self.attach(index, None)
    }

    fn slot(&self, index: usize) -> Result<&Arc<dyn Button>> {
        self.buttons.get(index).ok_or(DeckError::InvalidIndex {
            index,
            count: self.buttons.len(),
        })
    }

    /// Process key events, redraw requests and the flashing timer until `stop`
    /// is cancelled, then reset the device.
    ///
    /// # Errors
    /// Returns `DeckError::Device` if the key stream cannot be opened or the
    /// device cannot be reset.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<()> {
        let mut keys = self
            .device
            .read_keys()
            .map_err(|e| DeckError::Device(format!("cannot read keys from Stream Deck: {e}")))?;

        let mut flash =
            tokio::time::interval_at(Instant::now() + FLASHING_INTERVAL, FLASHING_INTERVAL);
        flash.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("deck running with {} keys", self.buttons.len());
        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                key = keys.recv() => match key {
                    Some(key) => LoopEvent::Key(key),
                    None => {
                        info!("the Stream Deck device closed the connection");
                        return Ok(());
                    }
                },
                Some(command) = self.command_rx.recv() => LoopEvent::Command(command),
                _ = flash.tick() => LoopEvent::Flash,
            };

            match event {
                LoopEvent::Key(key) => self.handle_key(key),
                LoopEvent::Command(command) => self.handle_command(command),
                LoopEvent::Flash => self.flash(),
            }
        }

        self.device
            .reset()
            .map_err(|e| DeckError::Device(format!("cannot reset Stream Deck: {e}")))
    }

    fn handle_key(&self, key: Key) {
        let Some(button) = self.buttons.get(key.index) else {
            return;
        };
        if key.pressed {
            button.pressed();
        } else {
            button.released();
        }
    }

    fn handle_command(&mut self, command: DeckCommand) {
        match command {
            DeckCommand::Redraw {
                index,
                redraw_images,
            } => self.redraw(index, redraw_images),
            DeckCommand::AttachPage(id) => {
                if let Err(e) = self.attach_page(&id) {
                    warn!("cannot switch page: {e}");
                }
            }
        }
    }

    fn flash(&mut self) {
        self.flash_on = !self.flash_on;
        for button in &self.buttons {
            button.flash(self.flash_on);
        }
    }

    /// Close the factories that did not create any button of the current configuration.
    pub fn close_unused_factories(&self) {
        for (factory, &count) in self.factories.iter().zip(&self.buttons_per_factory) {
            if count == 0 {
                factory.close();
            }
        }
    }

    /// Close all factories and with them their backend connections, then the device.
    ///
    /// # Errors
    /// Returns the device's error if it cannot be closed.
    pub fn close(&mut self) -> Result<()> {
        for factory in &self.factories {
            factory.close();
        }
        self.device.close()
    }
}
