use super::client::{
    AliveListener, MessageListener, MqttClient, SwrListener, TuneListener, TxListener,
};
use crate::button::{enabled_foreground, Button, ButtonBase, ButtonContext, Enabler, Selection};
use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tiny_skia::Color;

const SWR_ALERT: f64 = 3.0;
const SWR_WARNING: f64 = 1.5;

// --- AT100Tune ---

#[derive(Default)]
struct TuneState {
    enabled: bool,
    alive: bool,
    tx: bool,
    tuning: bool,
    swr: f64,
    off_image: Option<Image>,
    tuning_image: Option<Image>,
    tx_image: Option<Image>,
}

impl TuneState {
    fn clear(&mut self) {
        self.off_image = None;
        self.tuning_image = None;
        self.tx_image = None;
    }
}

/// Starts the tuning cycle of an ATU-100; shows the SWR while transmitting.
pub struct Atu100TuneButton {
    base: ButtonBase,
    client: Arc<MqttClient>,
    path: String,
    /// Case-folded `path`, as used in notifications.
    key: String,
    label: String,
    state: Mutex<TuneState>,
}

impl Atu100TuneButton {
    pub fn new(client: Arc<MqttClient>, path: &str, label: String) -> Arc<Self> {
        let key = client.add_atu100(path);
        let known = client.atu100(&key);
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(TuneState {
                enabled: client.is_connected(),
                alive: known.alive,
                tx: known.tx,
                tuning: known.tuning,
                swr: known.swr,
                ..TuneState::default()
            }),
            client,
            path: path.to_string(),
            key,
            label,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_alive(Arc::downgrade(&button) as Weak<dyn AliveListener>);
        button.client.listen_tx(Arc::downgrade(&button) as Weak<dyn TxListener>);
        button.client.listen_tune(Arc::downgrade(&button) as Weak<dyn TuneListener>);
        button.client.listen_swr(Arc::downgrade(&button) as Weak<dyn SwrListener>);
        button
    }

    /// Apply `change` if the notification is about this tuner; returns `true` if the state changed.
    fn update(&self, path: &str, change: impl FnOnce(&mut TuneState) -> bool) -> bool {
        if path != self.key {
            return false;
        }
        change(&mut self.state.lock())
    }
}

fn swr_background(gc: &GraphicContext, swr: f64) -> Color {
    let theme = gc.theme();
    if swr > SWR_ALERT {
        theme.alert
    } else if swr > SWR_WARNING {
        theme.warning
    } else {
        theme.ok
    }
}

impl AliveListener for Atu100TuneButton {
    fn set_alive(&self, path: &str, alive: bool) {
        let changed = self.update(path, |state| {
            let changed = state.alive != alive;
            state.alive = alive;
            state.clear();
            changed
        });
        if changed {
            self.base.invalidate(true);
        }
    }
}

impl TxListener for Atu100TuneButton {
    fn set_tx(&self, path: &str, tx: bool) {
        let changed = self.update(path, |state| {
            let changed = state.tx != tx;
            state.tx = tx;
            changed
        });
        if changed {
            self.base.invalidate(false);
        }
    }
}

impl TuneListener for Atu100TuneButton {
    fn set_tune(&self, path: &str, tuning: bool) {
        let changed = self.update(path, |state| {
            let changed = state.tuning != tuning;
            state.tuning = tuning;
            changed
        });
        if changed {
            self.base.invalidate(false);
        }
    }
}

impl SwrListener for Atu100TuneButton {
    fn set_swr(&self, path: &str, swr: f64) {
        let changed = self.update(path, |state| {
            let changed = state.swr != swr;
            if changed {
                state.swr = swr;
                state.tx_image = None;
            }
            changed
        });
        if changed {
            self.base.invalidate(true);
        }
    }
}

impl Enabler for Atu100TuneButton {
    fn enable(&self, enabled: bool) {
        {
            let mut state = self.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            state.clear();
        }
        self.base.invalidate(true);
    }
}

impl Button for Atu100TuneButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        if redraw_images {
            state.clear();
        }
        enabled_foreground(gc, state.enabled && state.alive);

        let off = state
            .off_image
            .get_or_insert_with(|| gc.draw_double_line_toggle_text_button("Tune", &self.label, 1))
            .clone();
        if state.tx {
            let swr = state.swr;
            return state
                .tx_image
                .get_or_insert_with(|| {
                    let background = swr_background(gc, swr);
                    gc.set_background(background);
                    gc.draw_single_line_text_button(&format!("{swr:3.2}"))
                })
                .clone();
        }
        if state.tuning {
            return state
                .tuning_image
                .get_or_insert_with(|| {
                    gc.swap_colors();
                    gc.draw_double_line_toggle_text_button("Tune", &self.label, 1)
                })
                .clone();
        }
        off
    }

    fn pressed(&self) {
        {
            let state = self.state.lock();
            if !(state.enabled && state.alive) {
                return;
            }
        }
        self.client.tune(&self.path);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

// --- Switch ---

/// What a press of a switch publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    /// Always publish the on payload.
    On,
    /// Always publish the off payload; the switch shows on while the input reports off.
    Off,
    /// Publish the opposite of the current state.
    Toggle,
}

impl FromStr for SwitchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            "TOGGLE" => Ok(Self::Toggle),
            other => Err(format!("unknown switch mode {other}")),
        }
    }
}

/// Topics and payloads of a switch.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub label: String,
    pub input_topic: String,
    pub output_topic: String,
    pub on_payload: String,
    pub off_payload: String,
    pub mode: SwitchMode,
}

/// Publishes a payload; shown inverted while the input topic reports on.
pub struct SwitchButton {
    base: ButtonBase,
    client: Arc<MqttClient>,
    config: SwitchConfig,
    state: Mutex<Selection>,
}

impl SwitchButton {
    pub fn new(client: Arc<MqttClient>, config: SwitchConfig) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(Selection::new(client.is_connected())),
            client,
            config,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button
            .client
            .listen_messages(Arc::downgrade(&button) as Weak<dyn MessageListener>);
        button.client.subscribe(&button.config.input_topic);
        button
    }

    fn is_on(&self, payload: &str) -> bool {
        let expected = match self.config.mode {
            SwitchMode::Off => &self.config.off_payload,
            SwitchMode::On | SwitchMode::Toggle => &self.config.on_payload,
        };
        payload.trim().eq_ignore_ascii_case(expected.trim())
    }
}

impl MessageListener for SwitchButton {
    fn message(&self, topic: &str, payload: &str) {
        if topic != self.config.input_topic {
            return;
        }
        if self.state.lock().select(self.is_on(payload)) {
            self.base.invalidate(false);
        }
    }
}

impl Enabler for SwitchButton {
    fn enable(&self, enabled: bool) {
        if self.state.lock().enable(enabled) {
            self.base.invalidate(true);
        }
    }
}

impl Button for SwitchButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        self.state
            .lock()
            .render_label(gc, redraw_images, &self.config.label)
    }

    fn pressed(&self) {
        let on = {
            let state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.selected
        };
        let payload = match self.config.mode {
            SwitchMode::On => &self.config.on_payload,
            SwitchMode::Off => &self.config.off_payload,
            SwitchMode::Toggle if on => &self.config.off_payload,
            SwitchMode::Toggle => &self.config.on_payload,
        };
        self.client.publish(&self.config.output_topic, payload);
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
    use crate::mqtt::client::tests::RecordingPublisher;
    use crate::render::Theme;
    use std::sync::atomic::Ordering;

    fn connected() -> (Arc<MqttClient>, Arc<RecordingPublisher>) {
        let client = MqttClient::offline();
        let publisher = Arc::new(RecordingPublisher::default());
        client.inject_publisher(publisher.clone());
        (client, publisher)
    }

    fn published(publisher: &RecordingPublisher) -> Vec<(String, String)> {
        std::mem::take(&mut *publisher.published.lock())
    }

    fn switch(mode: SwitchMode) -> SwitchConfig {
        SwitchConfig {
            label: "Amp".into(),
            input_topic: "amp/state".into(),
            output_topic: "amp/set".into(),
            on_payload: "ON".into(),
            off_payload: "OFF".into(),
            mode,
        }
    }

    #[test]
    fn tune_needs_a_living_tuner() {
        let (client, publisher) = connected();
        let button = Atu100TuneButton::new(client.clone(), "Shack/ATU", "ATU".into());
        let ctx = attach_counting(button.as_ref());

        button.pressed();
        assert!(published(&publisher).is_empty());

        client.inject_message("Shack/ATU/alive", "true");
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        button.pressed();
        assert_eq!(
            published(&publisher),
            vec![("Shack/ATU/cmd".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn tune_shows_swr_while_transmitting() {
        let (client, _publisher) = connected();
        let button = Atu100TuneButton::new(client.clone(), "atu", "ATU".into());
        let ctx = attach_counting(button.as_ref());
        let mut gc = GraphicContext::new(16, Theme::default());
        client.inject_message("atu/alive", "true");

        let off = button.image(&mut gc, false);
        assert_eq!(top_left(&off), [0, 0, 0, 255]);

        client.inject_message("atu/data", r#"{"txing": false, "tuning": true, "swr": 0}"#);
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 255, 255, 255]);

        client.inject_message("atu/data", r#"{"txing": true, "tuning": false, "swr": 1.2}"#);
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [0, 150, 0, 255]);

        client.inject_message("atu/data", r#"{"txing": true, "tuning": false, "swr": 2.0}"#);
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 165, 0, 255]);

        client.inject_message("atu/data", r#"{"txing": true, "tuning": false, "swr": 3.5}"#);
        gc.reset();
        assert_eq!(top_left(&button.image(&mut gc, false)), [255, 0, 0, 255]);
    }

    #[test]
    fn other_tuners_are_ignored() {
        let (client, _publisher) = connected();
        let button = Atu100TuneButton::new(client.clone(), "atu1", "1".into());
        let _other = Atu100TuneButton::new(client.clone(), "atu2", "2".into());
        let ctx = attach_counting(button.as_ref());

        client.inject_message("atu2/alive", "true");
        assert_eq!(ctx.total(), 0);
        assert!(!button.state.lock().alive);
    }

    #[test]
    fn switch_follows_input_topic() {
        let (client, publisher) = connected();
        let button = SwitchButton::new(client.clone(), switch(SwitchMode::Toggle));
        let ctx = attach_counting(button.as_ref());

        button.pressed();
        client.inject_message("amp/state", " on ");
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        client.inject_message("amp/other", "OFF");
        assert!(button.state.lock().selected);
        button.pressed();

        assert_eq!(
            published(&publisher),
            vec![
                ("amp/set".to_string(), "ON".to_string()),
                ("amp/set".to_string(), "OFF".to_string())
            ]
        );
    }

    #[test]
    fn switch_modes_publish_fixed_payloads() {
        let (client, publisher) = connected();
        let on = SwitchButton::new(client.clone(), switch(SwitchMode::On));
        let off = SwitchButton::new(client.clone(), switch(SwitchMode::Off));

        client.inject_message("amp/state", "OFF");
        assert!(!on.state.lock().selected);
        assert!(off.state.lock().selected);

        on.pressed();
        off.pressed();
        assert_eq!(
            published(&publisher),
            vec![
                ("amp/set".to_string(), "ON".to_string()),
                ("amp/set".to_string(), "OFF".to_string())
            ]
        );
    }

    #[test]
    fn switch_mode_is_parsed_loosely() {
        assert_eq!(" toggle ".parse::<SwitchMode>(), Ok(SwitchMode::Toggle));
        assert_eq!("Off".parse::<SwitchMode>(), Ok(SwitchMode::Off));
        assert!("dim".parse::<SwitchMode>().is_err());
    }

    #[test]
    fn disconnected_switch_is_disabled() {
        let client = MqttClient::offline();
        let button = SwitchButton::new(client.clone(), switch(SwitchMode::On));
        let ctx = attach_counting(button.as_ref());
        button.pressed();

        client.inject_connected(true);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        assert!(button.state.lock().enabled);
    }
}
