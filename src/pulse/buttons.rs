use super::client::{MuteListener, MuteTarget, PulseClient};
use crate::button::{enabled_foreground, Button, ButtonBase, ButtonContext, Enabler};
use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

const FONT_SIZE: f32 = 16.0;
const MUTED_ICON: &str = "volume_off.png";
const UNMUTED_ICON: &str = "volume_up.png";

struct MuteState {
    enabled: bool,
    muted: bool,
    muted_image: Option<Image>,
    unmuted_image: Option<Image>,
}

/// Toggles the mute state of a sink or source.
pub struct ToggleMuteButton {
    base: ButtonBase,
    client: Arc<PulseClient>,
    target: MuteTarget,
    label: String,
    state: Mutex<MuteState>,
}

impl ToggleMuteButton {
    pub fn new(client: Arc<PulseClient>, target: MuteTarget, label: String) -> Arc<Self> {
        let button = Arc::new(Self {
            base: ButtonBase::default(),
            state: Mutex::new(MuteState {
                enabled: client.is_connected(),
                muted: client.is_muted(&target).unwrap_or(false),
                muted_image: None,
                unmuted_image: None,
            }),
            client,
            target,
            label,
        });
        button.client.listen_enabled(Arc::downgrade(&button) as Weak<dyn Enabler>);
        button.client.listen_mute(Arc::downgrade(&button) as Weak<dyn MuteListener>);
        button.client.watch(&button.target);
        button
    }

    fn label(&self) -> &str {
        if self.label.is_empty() {
            &self.target.name
        } else {
            &self.label
        }
    }

    fn draw(&self, gc: &mut GraphicContext, icon: &str, inverted: bool) -> Image {
        match gc.load_icon_asset(icon) {
            Some(icon) => gc.draw_icon_label_button(&icon, self.label()),
            None => {
                // Without icons the muted state is shown inverted.
                if inverted {
                    gc.swap_colors();
                }
                let image = gc.draw_single_line_text_button(self.label());
                if inverted {
                    gc.swap_colors();
                }
                image
            }
        }
    }
}

impl MuteListener for ToggleMuteButton {
    fn set_mute(&self, target: &MuteTarget, muted: bool) {
        if *target != self.target {
            return;
        }
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

impl Enabler for ToggleMuteButton {
    fn enable(&self, enabled: bool) {
        {
            let mut state = self.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            state.muted_image = None;
            state.unmuted_image = None;
        }
        self.base.invalidate(true);
    }
}

impl Button for ToggleMuteButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut state = self.state.lock();
        if redraw_images {
            state.muted_image = None;
            state.unmuted_image = None;
        }
        gc.set_font_size(FONT_SIZE);
        enabled_foreground(gc, state.enabled);

        let cached = if state.muted {
            state.muted_image.clone()
        } else {
            state.unmuted_image.clone()
        };
        if let Some(image) = cached {
            return image;
        }
        let drawn = if state.muted {
            self.draw(gc, MUTED_ICON, true)
        } else {
            self.draw(gc, UNMUTED_ICON, false)
        };
        if state.muted {
            state.muted_image = Some(drawn.clone());
        } else {
            state.unmuted_image = Some(drawn.clone());
        }
        drawn
    }

    fn pressed(&self) {
        if !self.state.lock().enabled {
            return;
        }
        self.client.toggle_mute(&self.target);
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

    #[test]
    fn follows_mute_state_of_its_target() {
        let client = PulseClient::offline();
        client.inject_connected(true);
        let mic = MuteTarget::source("mic");
        let button = ToggleMuteButton::new(client.clone(), mic.clone(), "Mic".into());
        let ctx = attach_counting(button.as_ref());
        let mut gc = GraphicContext::new(16, Theme::default());

        let unmuted = button.image(&mut gc, false);
        assert_eq!(top_left(&unmuted), [0, 0, 0, 255]);

        client.inject_mute(&MuteTarget::sink("mic"), true);
        assert_eq!(ctx.total(), 0, "same name, other kind");

        client.inject_mute(&mic, true);
        assert_eq!(ctx.plain.load(Ordering::SeqCst), 1);
        gc.reset();
        let muted = button.image(&mut gc, false);
        assert_eq!(top_left(&muted), [255, 255, 255, 255]);
    }

    #[test]
    fn known_state_is_used_at_creation() {
        let client = PulseClient::offline();
        let speaker = MuteTarget::sink("speaker");
        client.inject_mute(&speaker, true);

        let button = ToggleMuteButton::new(client, speaker, String::new());
        assert!(button.state.lock().muted);
        assert!(!button.state.lock().enabled);
        assert_eq!(button.label(), "speaker");
    }

    #[test]
    fn enable_redraws_images() {
        let client = PulseClient::offline();
        let button = ToggleMuteButton::new(client.clone(), MuteTarget::sink("speaker"), "Spk".into());
        let ctx = attach_counting(button.as_ref());
        let mut gc = GraphicContext::new(16, Theme::default());
        button.image(&mut gc, false);

        client.inject_connected(true);
        assert_eq!(ctx.forced.load(Ordering::SeqCst), 1);
        assert!(button.state.lock().unmuted_image.is_none());
    }
}
