use super::client::{FrequencyListener, HamlibClient, ModeListener, PowerLevelListener, PttListener, VfoListener};
use crate::bandplan::{mode_portion_center, Band, BandMode};
use crate::button::{label_or, Button, ButtonBase, ButtonContext, Enabler, FlashState, FlashTile, Selection};
use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Power levels closer than this count as the same setting.
const POWER_LEVEL_TOLERANCE: f64 = 0.005;

// --- SetMode ---

/// Selects a mode; shown inverted while the radio is in that mode.
pub struct SetModeButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    mode: String,
    bandwidth: i64,
    label: String,
    state: Mutex<Selection>,
}

impl SetModeButton {
    pub fn new(client: Arc<HamlibClient>, mode: String, bandwidth: i64, label: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            mode,
            bandwidth,
            label,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mode(Arc::downgrade(&button) as Weak<dyn ModeListener>);
        if let Some(mode) = button.client.status().mode {
            button.set_mode(&mode);
        }
        button
    }
}

impl ModeListener for SetModeButton {
    fn set_mode(&self, mode: &str) {
        if self.state.lock().select(mode == self.mode) {
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

impl Button for SetModeButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.enabled, state.selected);
        let text = label_or(&self.label, &self.mode);
        state.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_single_line_text_button(text)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set_mode(&self.mode, self.bandwidth);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- ToggleMode ---

struct ToggleState {
    selection: Selection,
    current: usize,
}

/// Toggles between two modes; the current one is drawn big.
pub struct ToggleModeButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    modes: [String; 2],
    labels: [String; 2],
    state: Mutex<ToggleState>,
}

impl ToggleModeButton {
    pub fn new(client: Arc<HamlibClient>, modes: [String; 2], labels: [String; 2]) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(ToggleState {
                selection: Selection::new(client.is_connected()),
                current: 0,
            }),
            client,
            modes,
            labels,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mode(Arc::downgrade(&button) as Weak<dyn ModeListener>);
        if let Some(mode) = button.client.status().mode {
            button.set_mode(&mode);
        }
        button
    }

    /// The mode a press switches to.
    fn next_mode(&self) -> Option<&str> {
        let state = self.state.lock();
        if !state.selection.enabled {
            return None;
        }
        let mut index = state.current;
        if state.selection.selected {
            index = (index + 1) % self.modes.len();
        }
        Some(&self.modes[index])
    }
}

impl ModeListener for ToggleModeButton {
    fn set_mode(&self, mode: &str) {
        let changed = {
            let mut state = self.state.lock();
            let last = state.current;
            let found = self.modes.iter().position(|m| m == mode);
            if let Some(index) = found {
                state.current = index;
            }
            let selected_changed = state.selection.select(found.is_some());
            if selected_changed || state.current != last {
                state.selection.tile.clear();
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

impl Enabler for ToggleModeButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().selection.enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for ToggleModeButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.selection.enabled, state.selection.selected);
        let active_line = state.current + 1;
        let text1 = label_or(&self.labels[0], &self.modes[0]);
        let text2 = label_or(&self.labels[1], &self.modes[1]);
        state.selection.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_double_line_toggle_text_button(text1, text2, active_line)
        })
    }

    fn pressed(&self) {
        if let Some(mode) = self.next_mode() {
            self.client.set_mode(mode, 0);
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

// --- SetPowerLevel ---

/// Sets the RF power level; shown inverted while the radio uses that level.
pub struct SetPowerLevelButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    label: String,
    value: f64,
    state: Mutex<Selection>,
}

impl SetPowerLevelButton {
    pub fn new(client: Arc<HamlibClient>, label: String, value: f64) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            label,
            value,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button
            .client
            .listen_power_level(Arc::downgrade(&button) as Weak<dyn PowerLevelListener>);
        if let Some(level) = button.client.status().power_level {
            button.set_power_level(level);
        }
        button
    }
}

impl PowerLevelListener for SetPowerLevelButton {
    fn set_power_level(&self, level: f64) {
        let selected = (level - self.value).abs() < POWER_LEVEL_TOLERANCE;
        if self.state.lock().select(selected) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SetPowerLevelButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SetPowerLevelButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.enabled, state.selected);
        state.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_single_line_text_button(&self.label)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set_power_level(self.value);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- MOX ---

struct MoxState {
    enabled: bool,
    ptt: bool,
    flash: FlashState,
    tile: FlashTile,
}

/// Toggles PTT; flashes while transmitting.
pub struct MoxButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    label: String,
    state: Mutex<MoxState>,
}

impl MoxButton {
    pub fn new(client: Arc<HamlibClient>, label: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(MoxState {
                enabled: client.is_connected(),
                ptt: false,
                flash: FlashState::default(),
                tile: FlashTile::default(),
            }),
            client,
            label,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_ptt(Arc::downgrade(&button) as Weak<dyn PttListener>);
        if let Some(ptt) = button.client.status().ptt {
            button.set_ptt(ptt);
        }
        button
    }
}

impl PttListener for MoxButton {
    fn set_ptt(&self, ptt: bool) {
        {
            let mut state = self.state.lock();
            if state.ptt == ptt {
                return;
            }
            state.ptt = ptt;
            state.flash.on = false;
        }
        self.base.invalidate(false);
    }
}

impl Enabler for MoxButton {
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

impl Button for MoxButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, ptt, flash_on) = (state.enabled, state.ptt, state.flash.on);
        state
            .tile
            .render(gc, redraw_images, enabled, ptt, flash_on, &self.label)
    }

    fn pressed(&self) {
        let ptt = {
            let state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.ptt
        };
        self.client.set_ptt(!ptt);
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
            let (ptt, enabled) = (state.ptt, state.enabled);
            state.flash.tick(on, ptt, enabled)
        };
        if redraw {
            self.base.invalidate(false);
        }
    }
}

// --- SetVFO ---

/// Selects a VFO; shown inverted while that VFO is active.
pub struct SetVfoButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    label: String,
    vfo: String,
    state: Mutex<Selection>,
}

impl SetVfoButton {
    pub fn new(client: Arc<HamlibClient>, label: String, vfo: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            label,
            vfo,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_vfo(Arc::downgrade(&button) as Weak<dyn VfoListener>);
        if let Some(vfo) = button.client.status().vfo {
            button.set_vfo(&vfo);
        }
        button
    }
}

impl VfoListener for SetVfoButton {
    fn set_vfo(&self, vfo: &str) {
        if self.state.lock().select(vfo == self.vfo) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SetVfoButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SetVfoButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let (enabled, selected) = (state.enabled, state.selected);
        state.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_single_line_text_button(&self.label)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set_vfo(&self.vfo);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- Set ---

/// Sends a raw rigctld set command.
pub struct SetButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    label: String,
    command: String,
    args: Vec<String>,
    state: Mutex<Selection>,
}

impl SetButton {
    pub fn new(client: Arc<HamlibClient>, label: String, command: String, args: Vec<String>) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            label,
            command,
            args,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button
    }
}

impl Enabler for SetButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SetButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        let enabled = state.enabled;
        state.tile.render(gc, redraw_images, enabled, false, |gc| {
            gc.draw_single_line_text_button(&self.label)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.set(&self.command, &self.args);
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

/// The band plan usage of a rigctld mode.
pub fn band_mode(mode: &str) -> BandMode {
    match mode {
        "CW" | "CWR" => BandMode::Cw,
        "RTTY" | "RTTYR" | "FAX" | "PSK" | "PSKR" => BandMode::Digital,
        packet if packet.starts_with("PKT") => BandMode::Digital,
        _ => BandMode::Phone,
    }
}

/// Switches to a band; shown inverted while the radio is tuned into it.
///
/// With `use_up_down` the radio steps through its band stack with the
/// `BAND_UP`/`BAND_DOWN` VFO operations, which keeps its per band memory.
/// Otherwise the VFO is tuned into the band portion of the current mode.
pub struct SwitchToBandButton {
    base: ButtonBase,
    client: Arc<HamlibClient>,
    band: &'static Band,
    label: String,
    use_up_down: bool,
    state: Mutex<Selection>,
}

impl SwitchToBandButton {
    pub fn new(client: Arc<HamlibClient>, band: &'static Band, label: String, use_up_down: bool) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            band,
            label,
            use_up_down,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_frequency(Arc::downgrade(&button) as Weak<dyn FrequencyListener>);
        if let Some(frequency) = button.client.status().frequency {
            button.set_frequency(frequency);
        }
        button
    }

    fn step_bands(&self, current: &Band) {
        let (from, to) = (current.index(), self.band.index());
        let op = match to.cmp(&from) {
            Ordering::Greater => "BAND_UP",
            Ordering::Less => "BAND_DOWN",
            Ordering::Equal => return,
        };
        debug!(band = %self.band, steps = from.abs_diff(to), "stepping through the band stack");
        for _ in 0..from.abs_diff(to) {
            self.client.vfo_op(op);
        }
    }
}

impl FrequencyListener for SwitchToBandButton {
    fn set_frequency(&self, frequency: u64) {
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
        let mut state = self.state.lock();
        let (enabled, selected) = (state.enabled, state.selected);
        let text = label_or(&self.label, self.band.name);
        state.tile.render(gc, redraw_images, enabled, selected, |gc| {
            gc.draw_single_line_text_button(text)
        })
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        let status = self.client.status();
        let current = status.frequency.and_then(Band::by_frequency);
        if let (true, Some(current)) = (self.use_up_down, current) {
            self.step_bands(current);
            return;
        }
        let mode = status.mode.as_deref().map_or(BandMode::Phone, band_mode);
        let center = self.band.center();
        self.client.set_frequency(mode_portion_center(center, mode).unwrap_or(center));
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
    use std::sync::atomic::Ordering;

    fn gc() -> GraphicContext {
        GraphicContext::new(16, Theme::default())
    }

    fn connected() -> (Arc<HamlibClient>, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (client, requests) = HamlibClient::offline("rig:4532");
        client.inject_connected(true);
        (client, requests)
    }

    #[test]
    fn set_mode_follows_radio_mode() {
        let (client, mut requests) = connected();
        let button = SetModeButton::new(client.clone(), "CW".into(), 500, String::new());
        let ctx = attach_counting(button.as_ref());
        let mut gc = gc();

        let normal = button.image(&mut gc, false);
        assert_eq!(top_left(&normal), [0, 0, 0, 255]);

        client.inject_mode("CW");
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        gc.reset();
        let selected = button.image(&mut gc, false);
        assert_eq!(top_left(&selected), [255, 255, 255, 255]);

        client.inject_mode("USB");
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 2);

        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "M CW 500");
    }

    #[test]
    fn new_button_picks_up_known_mode() {
        let (client, _requests) = connected();
        client.inject_mode("LSB");
        let button = SetModeButton::new(client, "LSB".into(), 0, "Voice".into());
        assert!(button.state.lock().selected);
    }

    #[test]
    fn disabled_buttons_ignore_presses() {
        let (client, mut requests) = connected();
        let button = SetModeButton::new(client.clone(), "CW".into(), 0, String::new());
        let ctx = attach_counting(button.as_ref());

        client.inject_connected(false);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        button.pressed();
        assert!(requests.try_recv().is_err());

        client.inject_connected(true);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn toggle_mode_cycles_when_selected() {
        let (client, mut requests) = connected();
        let button = ToggleModeButton::new(
            client.clone(),
            ["USB".into(), "LSB".into()],
            [String::new(), String::new()],
        );
        let ctx = attach_counting(button.as_ref());

        // Not selected: a press sets the current mode.
        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "M USB 0");

        client.inject_mode("USB");
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "M LSB 0");

        client.inject_mode("LSB");
        assert_eq!(button.state.lock().current, 1);
        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "M USB 0");

        client.inject_mode("CW");
        assert!(!button.state.lock().selection.selected);
        assert_eq!(button.state.lock().current, 1);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn power_level_selection_tolerates_rounding() {
        let (client, mut requests) = connected();
        let button = SetPowerLevelButton::new(client.clone(), "50W".into(), 0.5);

        client.inject_power_level(0.502);
        assert!(button.state.lock().selected);
        client.inject_power_level(0.25);
        assert!(!button.state.lock().selected);

        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "L RFPOWER 0.500");
    }

    #[test]
    fn mox_flashes_while_transmitting() {
        let (client, mut requests) = connected();
        let button = MoxButton::new(client.clone(), "MOX".into());
        let ctx = attach_counting(button.as_ref());
        let mut gc = gc();

        button.flash(true);
        assert_eq!(ctx.total(), 0, "idle buttons do not flash");

        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "T 1");

        client.inject_ptt(true);
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        button.flash(true);
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 2);
        let flashing = button.image(&mut gc, false);
        assert_eq!(top_left(&flashing), [255, 0, 0, 255]);

        button.flash(false);
        gc.reset();
        let steady = button.image(&mut gc, false);
        assert_ne!(top_left(&steady), [255, 0, 0, 255]);

        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "T 0");
    }

    #[test]
    fn set_vfo_and_raw_set() {
        let (client, mut requests) = connected();
        let vfo = SetVfoButton::new(client.clone(), "A".into(), "VFOA".into());
        let set = SetButton::new(
            client.clone(),
            "Tuner".into(),
            "U".into(),
            vec!["TUNER".into(), "1".into()],
        );

        client.inject_vfo("VFOA");
        assert!(vfo.state.lock().selected);
        client.inject_vfo("VFOB");
        assert!(!vfo.state.lock().selected);

        vfo.pressed();
        set.pressed();
        assert_eq!(requests.try_recv().unwrap(), "V VFOA");
        assert_eq!(requests.try_recv().unwrap(), "U TUNER 1");
    }

    #[test]
    fn dropped_buttons_stop_listening() {
        let (client, _requests) = connected();
        let button = SetModeButton::new(client.clone(), "CW".into(), 0, String::new());
        drop(button);
        client.inject_mode("CW");
        client.inject_connected(false);
    }

    #[test]
    fn switch_to_band_tunes_into_the_mode_portion() {
        let (client, mut requests) = connected();
        let forty = Band::by_name("40m").unwrap();
        let button = SwitchToBandButton::new(client.clone(), forty, String::new(), false);

        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "F 7130000", "phone without a known mode");

        client.inject_mode("CW");
        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "F 7020000");

        client.inject_frequency(7_030_000);
        assert!(button.state.lock().selected);
        client.inject_frequency(14_074_000);
        assert!(!button.state.lock().selected);
    }

    #[test]
    fn switch_to_band_steps_through_the_band_stack() {
        let (client, mut requests) = connected();
        let twenty = Band::by_name("20m").unwrap();
        let button = SwitchToBandButton::new(client.clone(), twenty, "20".into(), true);

        // Without a known band the VFO is tuned directly.
        button.pressed();
        assert_eq!(requests.try_recv().unwrap(), "F 14225500");

        client.inject_frequency(3_700_000);
        button.pressed();
        for _ in 0..4 {
            assert_eq!(requests.try_recv().unwrap(), "G BAND_UP");
        }
        assert!(requests.try_recv().is_err());

        client.inject_frequency(28_500_000);
        button.pressed();
        for _ in 0..4 {
            assert_eq!(requests.try_recv().unwrap(), "G BAND_DOWN");
        }

        client.inject_frequency(14_200_000);
        assert!(button.state.lock().selected);
        button.pressed();
        assert!(requests.try_recv().is_err(), "already on the band");
    }

    #[test]
    fn rigctld_modes_map_to_band_portions() {
        assert_eq!(band_mode("CWR"), BandMode::Cw);
        assert_eq!(band_mode("PKTUSB"), BandMode::Digital);
        assert_eq!(band_mode("RTTY"), BandMode::Digital);
        assert_eq!(band_mode("LSB"), BandMode::Phone);
    }
}
