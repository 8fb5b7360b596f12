pub mod page;

use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long a key must be held to count as a long press.
pub const LONG_PRESS: Duration = Duration::from_secs(1);

/// Redraw capability handed to a button while it occupies a slot.
pub trait ButtonContext: Send + Sync {
    fn invalidate(&self, redraw_images: bool);
}

/// One logical control bound to a key.
///
/// Implementations keep their mutable state behind their own lock: backend
/// notifications arrive on backend tasks while the deck calls `image`,
/// `pressed` and `released` from its loop.
pub trait Button: Send + Sync {
    /// Current tile; cached images are regenerated when `redraw_images` is set
    /// or nothing is cached yet.
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image;

    fn pressed(&self);

    fn released(&self);

    fn attached(&self, ctx: Arc<dyn ButtonContext>);

    fn detached(&self);

    /// Called on every tick of the deck's flashing timer.
    fn flash(&self, _on: bool) {}
}

/// Buttons that grey out while their backend is unreachable.
pub trait Enabler: Send + Sync {
    fn enable(&self, enabled: bool);
}

/// Attach/detach bookkeeping shared by all buttons.
#[derive(Default)]
pub struct ButtonBase {
    ctx: Mutex<Option<Arc<dyn ButtonContext>>>,
}

impl ButtonBase {
    /// Ask for a redraw; does nothing while detached.
    pub fn invalidate(&self, redraw_images: bool) {
        let ctx = self.ctx.lock().clone();
        if let Some(ctx) = ctx {
            ctx.invalidate(redraw_images);
        }
    }

    pub fn attach(&self, ctx: Arc<dyn ButtonContext>) {
        *self.ctx.lock() = Some(ctx);
    }

    pub fn detach(&self) {
        *self.ctx.lock() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.ctx.lock().is_some()
    }
}

/// Foreground for the current enabled state.
pub fn enabled_foreground(gc: &mut GraphicContext, enabled: bool) {
    let color = if enabled {
        gc.theme().foreground
    } else {
        gc.theme().disabled
    };
    gc.set_foreground(color);
}

/// Cached normal and selected (inverted) rendering of a tile.
#[derive(Default)]
pub struct TextTile {
    image: Option<Image>,
    selected: Option<Image>,
}

impl TextTile {
    pub fn clear(&mut self) {
        self.image = None;
        self.selected = None;
    }

    pub fn render(
        &mut self,
        gc: &mut GraphicContext,
        redraw_images: bool,
        enabled: bool,
        selected: bool,
        draw: impl Fn(&mut GraphicContext) -> Image,
    ) -> Image {
        self.render_with(gc, redraw_images, enabled, selected, &draw, &draw)
    }

    /// Like [`TextTile::render`], with its own content for the selected tile.
    pub fn render_with(
        &mut self,
        gc: &mut GraphicContext,
        redraw_images: bool,
        enabled: bool,
        selected: bool,
        draw: impl Fn(&mut GraphicContext) -> Image,
        draw_selected: impl Fn(&mut GraphicContext) -> Image,
    ) -> Image {
        if redraw_images {
            self.clear();
        }
        enabled_foreground(gc, enabled);
        let image = self.image.get_or_insert_with(|| draw(gc)).clone();
        let selected_image = self
            .selected
            .get_or_insert_with(|| {
                gc.swap_colors();
                draw_selected(gc)
            })
            .clone();
        if selected {
            selected_image
        } else {
            image
        }
    }
}

/// Enabled/selected state of a text button with its cached tiles.
pub struct Selection {
    pub enabled: bool,
    pub selected: bool,
    pub tile: TextTile,
}

impl Selection {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            selected: false,
            tile: TextTile::default(),
        }
    }

    /// Returns `true` if the state changed; the cached tiles are dropped.
    pub fn enable(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.tile.clear();
        true
    }

    /// Returns `true` if the state changed.
    pub fn select(&mut self, selected: bool) -> bool {
        if self.selected == selected {
            return false;
        }
        self.selected = selected;
        true
    }

    /// Render the label tile for the current state.
    pub fn render_label(&mut self, gc: &mut GraphicContext, redraw_images: bool, label: &str) -> Image {
        let (enabled, selected) = (self.enabled, self.selected);
        self.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_single_line_text_button(label)
        })
    }
}

pub fn label_or<'a>(label: &'a str, fallback: &'a str) -> &'a str {
    if label.is_empty() {
        fallback
    } else {
        label
    }
}

/// Tile of a button that flashes while active (transmitting, tuning).
///
/// Inactive shows the normal tile; active alternates between the inverted
/// alert tile and the alert-background tile.
#[derive(Default)]
pub struct FlashTile {
    image: Option<Image>,
    selected: Option<Image>,
    flash: Option<Image>,
}

impl FlashTile {
    pub fn render(
        &mut self,
        gc: &mut GraphicContext,
        redraw_images: bool,
        enabled: bool,
        active: bool,
        flash_on: bool,
        label: &str,
    ) -> Image {
        if redraw_images || self.image.is_none() || self.selected.is_none() || self.flash.is_none() {
            enabled_foreground(gc, enabled);
            self.image = Some(gc.draw_single_line_text_button(label));
            let alert = gc.theme().alert;
            gc.set_background(alert);
            self.flash = Some(gc.draw_single_line_text_button(label));
            gc.swap_colors();
            self.selected = Some(gc.draw_single_line_text_button(label));
        }
        let image = match (active, flash_on) {
            (false, _) => &self.image,
            (true, true) => &self.flash,
            (true, false) => &self.selected,
        };
        image
            .clone()
            .unwrap_or_else(|| gc.draw_single_line_text_button(label))
    }
}

/// Flash phase of a flashing button; only tracked while active and enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlashState {
    pub on: bool,
}

impl FlashState {
    /// Returns `true` if the tile has to be redrawn.
    pub fn tick(&mut self, on: bool, active: bool, enabled: bool) -> bool {
        if !(active && enabled) {
            return false;
        }
        self.on = on;
        true
    }
}

/// Detects keys that stay pressed for a while.
///
/// `pressed` arms a timer and `released` disarms it; the callback runs on
/// the tokio runtime if the timer expires first.
pub struct LongPress {
    duration: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LongPress {
    fn default() -> Self {
        Self::new(LONG_PRESS)
    }
}

impl LongPress {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            timer: Mutex::new(None),
        }
    }

    pub fn pressed(&self, fire: impl FnOnce() + Send + 'static) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("long presses need a tokio runtime");
            return;
        };
        let duration = self.duration;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            fire();
        });
        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    pub fn released(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for LongPress {
    fn drop(&mut self) {
        self.released();
    }
}

/// Placeholder occupying every slot without a configured button.
pub struct EmptyButton {
    image: Mutex<Option<Image>>,
}

impl EmptyButton {
    pub fn new(gc: &mut GraphicContext) -> Self {
        Self {
            image: Mutex::new(Some(gc.draw_no_button())),
        }
    }
}

impl Button for EmptyButton {
    fn image(&self, gc: &mut GraphicContext, _redraw_images: bool) -> Image {
        self.image
            .lock()
            .get_or_insert_with(|| gc.draw_no_button())
            .clone()
    }

    fn pressed(&self) {}

    fn released(&self) {}

    fn attached(&self, _ctx: Arc<dyn ButtonContext>) {}

    fn detached(&self) {}
}
