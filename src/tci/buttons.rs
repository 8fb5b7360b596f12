use super::client::{
    DriveListener, FilterListener, FrequencyListener, ModeListener, MuteListener, TciClient, TuneListener,
    TxListener, VolumeListener,
};
use crate::bandplan::{in_mode_portion, mode_portion_center, Band, BandMode};
use crate::button::{
    enabled_foreground, label_or, Button, ButtonBase, ButtonContext, Enabler, FlashState, FlashTile, LongPress,
    Selection,
};
use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tiny_skia::Color;
use tracing::{debug, warn};

const MUTE_ICON: &str = "volume_off.png";
const VOLUME_UP_ICON: &str = "volume_up.png";
const VOLUME_DOWN_ICON: &str = "volume_down.png";
const ICON_LABEL_FONT_SIZE: f32 = 16.0;

pub const MAX_DRIVE: i64 = 100;
pub const MIN_VOLUME: i64 = -60;
pub const MAX_VOLUME: i64 = 0;

/// Band plan usage of a TCI modulation.
pub fn band_mode(mode: &str) -> BandMode {
    match mode {
        "cw" => BandMode::Cw,
        "digl" | "digu" | "spec" => BandMode::Digital,
        _ => BandMode::Phone,
    }
}

/// Buttons with an action bound to holding the key.
trait LongPressed: Send + Sync + 'static {
    fn long_pressed(&self);
}

/// Arm `long_press` to call back into the button behind `me`.
fn arm<B: LongPressed>(long_press: &LongPress, me: &Weak<B>) {
    let me = me.clone();
    long_press.pressed(move || {
        if let Some(button) = me.upgrade() {
            button.long_pressed();
        }
    });
}

/// Center VFO A and the panorama of `trx` on the `mode` portion of the current band.
fn jump_to_portion(client: &TciClient, trx: i64, mode: BandMode) {
    let frequency = client.status().frequencies.get(&trx).copied();
    let Some(target) = frequency.and_then(|f| mode_portion_center(f, mode)) else {
        warn!("cannot jump to the {mode} portion: the VFO is not in an amateur band");
        return;
    };
    debug!("jumping to the {mode} portion at {target} Hz");
    client.set_dds(trx, target);
    client.set_vfo_frequency(trx, target);
}

/// Tiles of a mode button: plain, selected, and highlighted while the VFO
/// sits in a band plan portion for the mode.
struct ModeState {
    selection: Selection,
    in_portion: bool,
    portion_image: Option<Image>,
}

impl ModeState {
    fn new(enabled: bool) -> Self {
        Self {
            selection: Selection::new(enabled),
            in_portion: false,
            portion_image: None,
        }
    }

    fn clear(&mut self) {
        self.selection.tile.clear();
        self.portion_image = None;
    }

    /// Returns `true` if the state changed.
    fn enable(&mut self, enabled: bool) -> bool {
        let changed = self.selection.enable(enabled);
        if changed {
            self.portion_image = None;
        }
        changed
    }

    /// Returns `true` if the state changed.
    fn locate(&mut self, frequency: Option<u64>, mode: BandMode) -> bool {
        let in_portion = frequency.is_some_and(|f| in_mode_portion(f, mode));
        if self.in_portion == in_portion {
            return false;
        }
        self.in_portion = in_portion;
        true
    }

    fn render(
        &mut self,
        gc: &mut GraphicContext,
        redraw_images: bool,
        draw: impl Fn(&mut GraphicContext) -> Image,
    ) -> Image {
        if redraw_images {
            self.portion_image = None;
        }
        let (enabled, selected) = (self.selection.enabled, self.selection.selected);
        let image = self
            .selection
            .tile
            .render(gc, redraw_images, enabled, selected, &draw);
        if selected || !self.in_portion {
            return image;
        }
        self.portion_image
            .get_or_insert_with(|| {
                enabled_foreground(gc, enabled);
                let highlight = gc.theme().highlight;
                gc.set_background(highlight);
                draw(gc)
            })
            .clone()
    }
}

// --- SetMode ---

/// Selects the modulation of a transceiver; shown inverted while it is
/// active. Holding the key jumps to the band plan portion of the mode.
pub struct SetModeButton {
    me: Weak<Self>,
    base: ButtonBase,
    client: Arc<TciClient>,
    trx: i64,
    mode: String,
    band_mode: BandMode,
    label: String,
    long_press: LongPress,
    state: Mutex<ModeState>,
}

impl SetModeButton {
    /// `mode` is expected in lower case.
    pub fn new(client: Arc<TciClient>, trx: i64, mode: String, label: String) -> Arc<Self> {
        let label = if label.is_empty() { mode.to_uppercase() } else { label };
        let button = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            base: ButtonBase::default(),
            state: Mutex::new(ModeState::new(client.is_connected())),
            client,
            trx,
            band_mode: band_mode(&mode),
            mode,
            label,
            long_press: LongPress::default(),
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mode(Arc::downgrade(&button) as Weak<dyn ModeListener>);
        button
            .client
            .listen_frequency(Arc::downgrade(&button) as Weak<dyn FrequencyListener>);
        let status = button.client.status();
        if let Some(mode) = status.modes.get(&button.trx) {
            button.set_mode(button.trx, mode);
        }
        if let Some(frequency) = status.frequencies.get(&button.trx) {
            button.set_frequency(button.trx, *frequency);
        }
        button
    }
}

impl ModeListener for SetModeButton {
    fn set_mode(&self, trx: i64, mode: &str) {
        if trx != self.trx {
            return;
        }
        if self.state.lock().selection.select(mode == self.mode) {
            self.base.invalidate(false);
        }
    }
}

impl FrequencyListener for SetModeButton {
    fn set_frequency(&self, trx: i64, frequency: u64) {
        if trx != self.trx {
            return;
        }
        if self.state.lock().locate(Some(frequency), self.band_mode) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SetModeButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl LongPressed for SetModeButton {
    fn long_pressed(&self) {
        if !self.state.lock().selection.enabled {
            return;
        }
        jump_to_portion(&self.client, self.trx, self.band_mode);
    }
}

impl Button for SetModeButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        self.state
            .lock()
            .render(gc, redraw_images, |gc| gc.draw_single_line_text_button(&self.label))
    }

    fn pressed(&self) {
        arm(&self.long_press, &self.me);
        if !self.state.lock().selection.enabled {
            return;
        }
        self.client.set_mode(self.trx, &self.mode);
    }

    fn released(&self) {
        self.long_press.released();
    }

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- ToggleMode ---

struct ToggleState {
    mode: ModeState,
    current: usize,
}

/// Toggles between two modulations; the current one is drawn big.
/// Holding the key jumps to the band plan portion of the current one.
pub struct ToggleModeButton {
    me: Weak<Self>,
    base: ButtonBase,
    client: Arc<TciClient>,
    trx: i64,
    modes: [String; 2],
    band_modes: [BandMode; 2],
    labels: [String; 2],
    long_press: LongPress,
    state: Mutex<ToggleState>,
}

impl ToggleModeButton {
    /// Modes are expected in lower case; empty labels show the mode.
    pub fn new(client: Arc<TciClient>, trx: i64, modes: [String; 2], labels: [String; 2]) -> Arc<Self> {
        let labels = [0, 1].map(|i| label_or(&labels[i], &modes[i].to_uppercase()).to_string());
        let button = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            base: ButtonBase::default(),
            state: Mutex::new(ToggleState {
                mode: ModeState::new(client.is_connected()),
                current: 0,
            }),
            client,
            trx,
            band_modes: [band_mode(&modes[0]), band_mode(&modes[1])],
            modes,
            labels,
            long_press: LongPress::default(),
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mode(Arc::downgrade(&button) as Weak<dyn ModeListener>);
        button
            .client
            .listen_frequency(Arc::downgrade(&button) as Weak<dyn FrequencyListener>);
        let status = button.client.status();
        if let Some(frequency) = status.frequencies.get(&button.trx) {
            button.set_frequency(button.trx, *frequency);
        }
        if let Some(mode) = status.modes.get(&button.trx) {
            button.set_mode(button.trx, mode);
        }
        button
    }

    /// The mode a press switches to.
    fn next_mode(&self) -> Option<&str> {
        let state = self.state.lock();
        if !state.mode.selection.enabled {
            return None;
        }
        let mut index = state.current;
        if state.mode.selection.selected {
            index = (index + 1) % self.modes.len();
        }
        Some(&self.modes[index])
    }
}

impl ModeListener for ToggleModeButton {
    fn set_mode(&self, trx: i64, mode: &str) {
        if trx != self.trx {
            return;
        }
        let frequency = self.client.status().frequencies.get(&trx).copied();
        let changed = {
            let mut state = self.state.lock();
            let last = state.current;
            let found = self.modes.iter().position(|m| m == mode);
            if let Some(index) = found {
                state.current = index;
            }
            let selected_changed = state.mode.selection.select(found.is_some());
            let current = state.current;
            let portion_changed = state.mode.locate(frequency, self.band_modes[current]);
            if selected_changed || portion_changed || state.current != last {
                state.mode.clear();
                true
            } else {
                false
            }
        };
        if changed {
            self.base.invalidate(true);
        }
    }
}

impl FrequencyListener for ToggleModeButton {
    fn set_frequency(&self, trx: i64, frequency: u64) {
        if trx != self.trx {
            return;
        }
        let changed = {
            let mut state = self.state.lock();
            let mode = self.band_modes[state.current];
            state.mode.locate(Some(frequency), mode)
        };
        if changed {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for ToggleModeButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().mode.enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl LongPressed for ToggleModeButton {
    fn long_pressed(&self) {
        let mode = {
            let state = self.state.lock();
            if !state.mode.selection.enabled {
                return;
            }
            self.band_modes[state.current]
        };
        jump_to_portion(&self.client, self.trx, mode);
    }
}

impl Button for ToggleModeButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let active_line = state.current + 1;
        state.mode.render(gc, redraw_images, |gc| {
            gc.draw_double_line_toggle_text_button(&self.labels[0], &self.labels[1], active_line)
        })
    }

    fn pressed(&self) {
        arm(&self.long_press, &self.me);
        if let Some(mode) = self.next_mode() {
            self.client.set_mode(self.trx, mode);
        }
    }

    fn released(&self) {
        self.long_press.released();
    }

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- MOX and Tune ---

/// What a transmit button switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    Mox,
    Tune,
}

struct TransmitState {
    enabled: bool,
    active: bool,
    flash: FlashState,
    tile: FlashTile,
}

/// Toggles transmitting or tuning of a transceiver; flashes while active.
pub struct TransmitButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    kind: Transmit,
    trx: i64,
    label: String,
    state: Mutex<TransmitState>,
}

impl TransmitButton {
    pub fn new(client: Arc<TciClient>, kind: Transmit, trx: i64, label: String) -> Arc<Self> {
        let default_label = match kind {
            Transmit::Mox => "TX",
            Transmit::Tune => "Tune",
        };
        let status = client.status();
        let known = match kind {
            Transmit::Mox => status.tx.get(&trx),
            Transmit::Tune => status.tune.get(&trx),
        };
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(TransmitState {
                enabled: client.is_connected(),
                active: known.copied().unwrap_or(false),
                flash: FlashState::default(),
                tile: FlashTile::default(),
            }),
            label: label_or(&label, default_label).to_string(),
            client,
            kind,
            trx,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        match kind {
            Transmit::Mox => button.client.listen_tx(Arc::downgrade(&button) as Weak<dyn TxListener>),
            Transmit::Tune => button.client.listen_tune(Arc::downgrade(&button) as Weak<dyn TuneListener>),
        }
        button
    }

    fn set_active(&self, trx: i64, active: bool) {
        if trx != self.trx {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.active == active {
                return;
            }
            state.active = active;
            state.flash.on = false;
        }
        self.base.invalidate(false);
    }
}

impl TxListener for TransmitButton {
    fn set_tx(&self, trx: i64, ptt: bool) {
        self.set_active(trx, ptt);
    }
}

impl TuneListener for TransmitButton {
    fn set_tune(&self, trx: i64, tuning: bool) {
        self.set_active(trx, tuning);
    }
}

impl Enabler for TransmitButton {
    fn enable(&self, enabled: bool) {
        {
            let mut state = self.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            state.flash.on = false;
        }
        self.base.invalidate(true);
    }
}

impl Button for TransmitButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, active, flash_on) = (state.enabled, state.active, state.flash.on);
        state
            .tile
            .render(gc, redraw_images, enabled, active, flash_on, &self.label)
    }

    fn pressed(&self) {
        let active = {
            let state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.active
        };
        match self.kind {
            Transmit::Mox => self.client.set_tx(self.trx, !active),
            Transmit::Tune => self.client.set_tune(self.trx, !active),
        }
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }

    fn flash(&self, on: bool) {
        let redraw = {
            let mut state = self.state.lock();
            let (active, enabled) = (state.active, state.enabled);
            state.flash.tick(on, active, enabled)
        };
        if redraw {
            self.base.invalidate(false);
        }
    }
}

// --- Mute ---

struct MuteState {
    enabled: bool,
    muted: bool,
    image: Option<Image>,
    muted_image: Option<Image>,
}

/// Toggles the main audio mute; shown in the alert color while muted.
pub struct MuteButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    label: String,
    state: Mutex<MuteState>,
}

impl MuteButton {
    pub fn new(client: Arc<TciClient>, label: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(MuteState {
                enabled: client.is_connected(),
                muted: client.status().mute.unwrap_or(false),
                image: None,
                muted_image: None,
            }),
            label: label_or(&label, "Main").to_string(),
            client,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mute(Arc::downgrade(&button) as Weak<dyn MuteListener>);
        button
    }

    fn draw(&self, gc: &mut GraphicContext) -> Image {
        match gc.load_icon_asset(MUTE_ICON) {
            Some(icon) => gc.draw_icon_label_button(&icon, &self.label),
            None => gc.draw_single_line_text_button(&self.label),
        }
    }
}

impl MuteListener for MuteButton {
    fn set_mute(&self, muted: bool) {
        {
            let mut state = self.state.lock();
            if state.muted == muted {
                return;
            }
            state.muted = muted;
        }
        self.base.invalidate(false);
    }
}

impl Enabler for MuteButton {
    fn enable(&self, enabled: bool) {
        {
            let mut state = self.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            state.image = None;
            state.muted_image = None;
        }
        self.base.invalidate(true);
    }
}

impl Button for MuteButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        if redraw_images {
            state.image = None;
            state.muted_image = None;
        }
        let enabled = state.enabled;
        enabled_foreground(gc, enabled);
        let image = state.image.get_or_insert_with(|| self.draw(gc)).clone();
        if !state.muted {
            return image;
        }
        state
            .muted_image
            .get_or_insert_with(|| {
                let alert = gc.theme().alert;
                if enabled {
                    gc.set_background(alert);
                    gc.set_foreground(Color::WHITE);
                } else {
                    gc.set_foreground(alert);
                }
                self.draw(gc)
            })
            .clone()
    }

    fn pressed(&self) {
        let muted = {
            let state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.muted
        };
        self.client.set_mute(!muted);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- SetDrive ---

/// Sets the drive level; shown inverted while the transceiver uses that level.
pub struct SetDriveButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    label: String,
    value: i64,
    state: Mutex<Selection>,
}

impl SetDriveButton {
    pub fn new(client: Arc<TciClient>, label: String, value: i64) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            label,
            value,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_drive(Arc::downgrade(&button) as Weak<dyn DriveListener>);
        if let Some(drive) = button.client.status().drive {
            button.set_drive(drive);
        }
        button
    }
}

impl DriveListener for SetDriveButton {
    fn set_drive(&self, percent: i64) {
        if self.state.lock().select(percent == self.value) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SetDriveButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SetDriveButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        self.state.lock().render_label(gc, redraw_images, &self.label)
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set_drive(self.value);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- SetFilter ---

/// Sets the RX filter passband; shown inverted while the transceiver uses it.
pub struct SetFilterButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    trx: i64,
    low: i64,
    high: i64,
    label: String,
    icon: String,
    state: Mutex<Selection>,
}

impl SetFilterButton {
    /// `icon` names an asset without extension.
    pub fn new(client: Arc<TciClient>, trx: i64, (low, high): (i64, i64), label: String, icon: &str) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            trx,
            low,
            high,
            label,
            icon: format!("{icon}.png"),
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button
            .client
            .listen_rx_filter_band(Arc::downgrade(&button) as Weak<dyn FilterListener>);
        if let Some((low, high)) = button.client.status().filters.get(&button.trx) {
            button.set_rx_filter_band(button.trx, *low, *high);
        }
        button
    }
}

/// The icon asset above `text`, or just the text if the asset is missing.
fn draw_icon_label(gc: &mut GraphicContext, icon: &str, text: &str) -> Image {
    match gc.load_icon_asset(icon) {
        Some(icon) => {
            gc.set_font_size(ICON_LABEL_FONT_SIZE);
            gc.draw_icon_label_button(&icon, text)
        }
        None => gc.draw_single_line_text_button(text),
    }
}

impl FilterListener for SetFilterButton {
    fn set_rx_filter_band(&self, trx: i64, low: i64, high: i64) {
        if trx != self.trx {
            return;
        }
        let selected = (low, high) == (self.low, self.high);
        if self.state.lock().select(selected) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SetFilterButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SetFilterButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.enabled, state.selected);
        state.tile.render(gc, redraw_images, enabled, selected, |gc| {
            draw_icon_label(gc, &self.icon, &self.label)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set_rx_filter_band(self.trx, self.low, self.high);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- IncrementDrive and IncrementVolume ---

/// A level stepped by a fixed increment within `min..=max`.
struct LevelState {
    selection: Selection,
    current: Option<i64>,
}

impl LevelState {
    fn new(enabled: bool) -> Self {
        Self {
            selection: Selection::new(enabled),
            current: None,
        }
    }

    /// Store the reported level; selected once the level hits `limit`.
    /// Returns `true` if the selection changed.
    fn update(&mut self, level: i64, limit: i64) -> bool {
        self.current = Some(level);
        self.selection.select(level == limit)
    }

    /// The next level, or `None` while disabled or the level is unknown.
    fn step(&self, increment: i64, min: i64, max: i64) -> Option<i64> {
        if !self.selection.enabled {
            return None;
        }
        let Some(current) = self.current else {
            debug!("level not reported yet, ignoring the key");
            return None;
        };
        Some((current + increment).clamp(min, max))
    }
}

/// Steps the drive level; holding the key goes straight to the limit.
/// Shown inverted with the level once the limit is reached.
pub struct IncrementDriveButton {
    me: Weak<Self>,
    base: ButtonBase,
    client: Arc<TciClient>,
    label: String,
    increment: i64,
    long_press: LongPress,
    state: Mutex<LevelState>,
}

impl IncrementDriveButton {
    pub fn new(client: Arc<TciClient>, label: String, increment: i64) -> Arc<Self> {
        let current = client.status().drive;
        let button = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            base: ButtonBase::default(),
            state: Mutex::new(LevelState::new(client.is_connected())),
            client,
            label,
            increment,
            long_press: LongPress::default(),
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_drive(Arc::downgrade(&button) as Weak<dyn DriveListener>);
        if let Some(drive) = current {
            button.set_drive(drive);
        }
        button
    }

    /// 100% when stepping up, 0% when stepping down.
    fn limit(&self) -> i64 {
        if self.increment > 0 {
            MAX_DRIVE
        } else {
            0
        }
    }
}

impl DriveListener for IncrementDriveButton {
    fn set_drive(&self, percent: i64) {
        if self.state.lock().update(percent, self.limit()) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for IncrementDriveButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().selection.enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl LongPressed for IncrementDriveButton {
    fn long_pressed(&self) {
        if !self.state.lock().selection.enabled {
            return;
        }
        self.client.set_drive(self.limit());
    }
}

impl Button for IncrementDriveButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.selection.enabled, state.selection.selected);
        let value = format!("{}%", self.limit());
        state.selection.tile.render_with(
            gc,
            redraw_images,
            enabled,
            selected,
            |gc| gc.draw_single_line_text_button(&self.label),
            |gc| gc.draw_single_line_text_button(&value),
        )
    }

    fn pressed(&self) {
        arm(&self.long_press, &self.me);
        let next = self.state.lock().step(self.increment, 0, MAX_DRIVE);
        if let Some(percent) = next {
            self.client.set_drive(percent);
        }
    }

    fn released(&self) {
        self.long_press.released();
    }

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

/// Steps the main volume in dB. Shown inverted with the level once the
/// limit is reached (0 dB up, -60 dB down).
pub struct IncrementVolumeButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    label: String,
    increment: i64,
    state: Mutex<LevelState>,
}

impl IncrementVolumeButton {
    pub fn new(client: Arc<TciClient>, label: String, increment: i64) -> Arc<Self> {
        let current = client.status().volume;
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(LevelState::new(client.is_connected())),
            client,
            label,
            increment,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_volume(Arc::downgrade(&button) as Weak<dyn VolumeListener>);
        if let Some(db) = current {
            button.set_volume(db);
        }
        button
    }

    fn limit(&self) -> i64 {
        if self.increment > 0 {
            MAX_VOLUME
        } else {
            MIN_VOLUME
        }
    }

    fn icon(&self) -> &'static str {
        if self.increment > 0 {
            VOLUME_UP_ICON
        } else {
            VOLUME_DOWN_ICON
        }
    }
}

impl VolumeListener for IncrementVolumeButton {
    fn set_volume(&self, db: i64) {
        if self.state.lock().update(db, self.limit()) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for IncrementVolumeButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().selection.enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for IncrementVolumeButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.selection.enabled, state.selection.selected);
        let value = format!("{}dB", self.limit());
        let icon = self.icon();
        state.selection.tile.render_with(
            gc,
            redraw_images,
            enabled,
            selected,
            |gc| draw_icon_label(gc, icon, &self.label),
            |gc| draw_icon_label(gc, icon, &value),
        )
    }

    fn pressed(&self) {
        let next = self.state.lock().step(self.increment, MIN_VOLUME, MAX_VOLUME);
        if let Some(db) = next {
            self.client.set_volume(db);
        }
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- SwitchToBand ---

/// Tunes VFO A to a band, keeping the current modulation; shown inverted
/// while the VFO is in that band.
pub struct SwitchToBandButton {
    base: ButtonBase,
    client: Arc<TciClient>,
    trx: i64,
    band: &'static Band,
    label: String,
    state: Mutex<Selection>,
}

impl SwitchToBandButton {
    pub fn new(client: Arc<TciClient>, trx: i64, band: &'static Band, label: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            label: label_or(&label, band.name).to_string(),
            client,
            trx,
            band,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button
            .client
            .listen_frequency(Arc::downgrade(&button) as Weak<dyn FrequencyListener>);
        if let Some(frequency) = button.client.status().frequencies.get(&button.trx) {
            button.set_frequency(button.trx, *frequency);
        }
        button
    }
}

impl FrequencyListener for SwitchToBandButton {
    fn set_frequency(&self, trx: i64, frequency: u64) {
        if trx != self.trx {
            return;
        }
        if self.state.lock().select(self.band.contains(frequency)) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SwitchToBandButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SwitchToBandButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        self.state.lock().render_label(gc, redraw_images, &self.label)
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        let mode = self.client.status().modes.get(&self.trx).cloned();
        let portion = mode.as_deref().map_or(BandMode::Phone, band_mode);
        let target = mode_portion_center(self.band.center(), portion).unwrap_or_else(|| self.band.center());
        self.client.set_vfo_frequency(self.trx, target);
        if let Some(mode) = mode {
            self.client.set_mode(self.trx, &mode);
        }
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::tests::{attach_counting, top_left};
    use crate::render::Theme;
    use crate::tci::protocol::Message;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connected() -> (Arc<TciClient>, UnboundedReceiver<Message>) {
        let (client, requests) = TciClient::offline();
        client.inject_connected(true);
        (client, requests)
    }

    fn sent(requests: &mut UnboundedReceiver<Message>) -> Vec<String> {
        std::iter::from_fn(|| requests.try_recv().ok())
            .map(|m| m.to_string())
            .collect()
    }

    #[test]
    fn set_mode_watches_its_trx() {
        let (client, mut requests) = connected();
        client.inject_frame("modulation:1,CW;");
        let button = SetModeButton::new(client.clone(), 1, "cw".into(), String::new());
        assert!(button.state.lock().selection.selected);
        assert_eq!(button.label, "CW");
        let ctx = attach_counting(button.as_ref());

        client.inject_frame("modulation:0,USB;");
        assert_eq!(ctx.total(), 0);
        client.inject_frame("modulation:1,USB;");
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["modulation:1,cw;"]);
    }

    #[test]
    fn mox_toggles_and_flashes() {
        let (client, mut requests) = connected();
        let button = TransmitButton::new(client.clone(), Transmit::Mox, 0, String::new());
        assert_eq!(button.label, "TX");
        let ctx = attach_counting(button.as_ref());
        let mut gc = GraphicContext::new(16, Theme::default());

        button.flash(true);
        assert_eq!(ctx.total(), 0);
        button.pressed();

        client.inject_frame("trx:0,true;");
        button.flash(true);
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 2);
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 0, 0, 255]);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["trx:0,true;", "trx:0,false;"]);
    }

    #[test]
    fn tune_ignores_transmit_notifications() {
        let (client, mut requests) = connected();
        let button = TransmitButton::new(client.clone(), Transmit::Tune, 0, "ATU".into());
        let ctx = attach_counting(button.as_ref());

        client.inject_frame("trx:0,true;");
        assert_eq!(ctx.total(), 0);
        client.inject_frame("tune:0,true;");
        assert!(button.state.lock().active);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["tune:0,false;"]);

        client.inject_connected(false);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        button.pressed();
        assert!(sent(&mut requests).is_empty());
    }

    #[test]
    fn mute_shows_alert_while_muted() {
        let (client, mut requests) = connected();
        let button = MuteButton::new(client.clone(), String::new());
        let mut gc = GraphicContext::new(16, Theme::default());
        assert_eq!(button.label, "Main");

        assert_eq!(top_left(&button.image(&mut gc, false)), [0, 0, 0, 255]);
        client.inject_frame("mute:true;");
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 0, 0, 255]);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["mute:false;"]);
    }

    #[test]
    fn set_drive_selects_matching_level() {
        let (client, mut requests) = connected();
        let button = SetDriveButton::new(client.clone(), "50%".into(), 50);

        client.inject_frame("drive:0,50;");
        assert!(button.state.lock().selected);
        client.inject_frame("drive:40;");
        assert!(!button.state.lock().selected);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["drive:50;"]);
    }

    #[test]
    fn set_mode_highlights_its_band_portion() {
        let (client, mut requests) = connected();
        client.inject_frame("vfo:0,0,14030000;");
        let button = SetModeButton::new(client.clone(), 0, "cw".into(), String::new());
        let ctx = attach_counting(button.as_ref());
        let mut gc = GraphicContext::new(72, Theme::default());
        assert_eq!(top_left(&button.image(&mut gc, false)), [0, 0, 255, 255]);

        client.inject_frame("vfo:0,0,14200000;");
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [0, 0, 0, 255]);

        client.inject_frame("modulation:0,CW;");
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 255, 255, 255]);

        button.long_pressed();
        assert_eq!(sent(&mut requests), vec!["dds:0,14035000;", "vfo:0,0,14035000;"]);
    }

    #[test]
    fn long_press_outside_the_bands_is_ignored() {
        let (client, mut requests) = connected();
        let button = SetModeButton::new(client.clone(), 0, "usb".into(), String::new());
        button.long_pressed();
        client.inject_frame("vfo:0,0,12000000;");
        button.long_pressed();
        assert!(sent(&mut requests).is_empty());
    }

    #[test]
    fn toggle_mode_follows_the_current_mode() {
        let (client, mut requests) = connected();
        client.inject_frame("vfo:0,0,14030000;modulation:0,CW;");
        let button = ToggleModeButton::new(
            client.clone(),
            0,
            ["usb".into(), "cw".into()],
            ["Voice".into(), String::new()],
        );
        assert_eq!(button.labels, ["Voice".to_string(), "CW".to_string()]);
        {
            let state = button.state.lock();
            assert_eq!(state.current, 1);
            assert!(state.mode.selection.selected);
            assert!(state.mode.in_portion);
        }
        let ctx = attach_counting(button.as_ref());

        button.pressed();
        button.long_pressed();
        assert_eq!(
            sent(&mut requests),
            vec!["modulation:0,usb;", "dds:0,14035000;", "vfo:0,0,14035000;"]
        );

        client.inject_frame("modulation:0,USB;");
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        assert!(!button.state.lock().mode.in_portion);
        client.inject_frame("modulation:1,LSB;modulation:0,LSB;");
        assert_eq!(button.state.lock().current, 0);
        assert!(!button.state.lock().mode.selection.selected);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["modulation:0,usb;"]);
    }

    #[test]
    fn set_filter_selects_its_passband() {
        let (client, mut requests) = connected();
        let button = SetFilterButton::new(client.clone(), 0, (300, 2700), "SSB".into(), "filter");
        assert_eq!(button.icon, "filter.png");

        client.inject_frame("rx_filter_band:1,300,2700;");
        assert!(!button.state.lock().selected);
        client.inject_frame("rx_filter_band:0,300,2700;");
        assert!(button.state.lock().selected);

        let mut gc = GraphicContext::new(72, Theme::default());
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 255, 255, 255]);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["rx_filter_band:0,300,2700;"]);
    }

    #[test]
    fn increment_drive_steps_to_the_limit() {
        let (client, mut requests) = connected();
        let up = IncrementDriveButton::new(client.clone(), "+10".into(), 10);

        up.pressed();
        assert!(sent(&mut requests).is_empty(), "level still unknown");

        client.inject_frame("drive:95;");
        up.pressed();
        assert_eq!(sent(&mut requests), vec!["drive:100;"]);

        client.inject_frame("drive:100;");
        assert!(up.state.lock().selection.selected);
        let mut gc = GraphicContext::new(72, Theme::default());
        assert_eq!(top_left(&up.image(&mut gc, false)), [255, 255, 255, 255]);

        let down = IncrementDriveButton::new(client.clone(), "-10".into(), -10);
        assert!(!down.state.lock().selection.selected);
        down.pressed();
        down.long_pressed();
        assert_eq!(sent(&mut requests), vec!["drive:90;", "drive:0;"]);

        client.inject_connected(false);
        down.long_pressed();
        assert!(sent(&mut requests).is_empty());
    }

    #[test]
    fn increment_volume_stays_in_range() {
        let (client, mut requests) = connected();
        client.inject_frame("volume:-3;");
        let up = IncrementVolumeButton::new(client.clone(), "Vol+".into(), 6);
        let down = IncrementVolumeButton::new(client.clone(), "Vol-".into(), -10);
        assert_eq!((up.icon(), down.icon()), ("volume_up.png", "volume_down.png"));

        up.pressed();
        client.inject_frame("volume:-55;");
        down.pressed();
        assert_eq!(sent(&mut requests), vec!["volume:0;", "volume:-60;"]);

        client.inject_frame("volume:-60;");
        assert!(down.state.lock().selection.selected);
        assert!(!up.state.lock().selection.selected);
    }

    #[test]
    fn switch_to_band_keeps_the_mode() {
        let (client, mut requests) = connected();
        client.inject_frame("modulation:0,CW;vfo:0,0,7030000;");
        let twenty = Band::by_name("20m").unwrap();
        let button = SwitchToBandButton::new(client.clone(), 0, twenty, String::new());
        assert_eq!(button.label, "20m");
        assert!(!button.state.lock().selected);

        button.pressed();
        assert_eq!(sent(&mut requests), vec!["vfo:0,0,14035000;", "modulation:0,cw;"]);

        client.inject_frame("vfo:0,0,14035000;");
        assert!(button.state.lock().selected);

        let (client, mut requests) = connected();
        let button = SwitchToBandButton::new(client, 0, twenty, "20".into());
        button.pressed();
        assert_eq!(sent(&mut requests), vec!["vfo:0,0,14225500;"]);
    }
}
