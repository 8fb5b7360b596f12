use crate::button::{Button, ButtonBase, ButtonContext};
use crate::config::schema::{ButtonConfig, LABEL};
use crate::event::DeckCommand;
use crate::factory::ButtonFactory;
use crate::render::{GraphicContext, Image};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const PAGE_BUTTON_TYPE: &str = "hamdeck.Page";
pub const PAGE: &str = "page";

/// Posts page switches to the deck loop.
#[derive(Debug, Clone)]
pub struct PageSwitcher {
    tx: mpsc::UnboundedSender<DeckCommand>,
}

impl PageSwitcher {
    pub fn new(tx: mpsc::UnboundedSender<DeckCommand>) -> Self {
        Self { tx }
    }

    pub fn attach_page(&self, id: &str) {
        if self.tx.send(DeckCommand::AttachPage(id.to_string())).is_err() {
            debug!("deck is gone, page {id} not attached");
        }
    }
}

/// Switches to another page when pressed.
pub struct PageButton {
    base: ButtonBase,
    switcher: PageSwitcher,
    id: String,
    label: String,
    image: Mutex<Option<Image>>,
}

impl PageButton {
    pub fn new(switcher: PageSwitcher, id: String, label: String) -> Self {
        Self {
            base: ButtonBase::default(),
            switcher,
            id,
            label,
            image: Mutex::new(None),
        }
    }
}

impl Button for PageButton {
    fn image(&self, gc: &mut GraphicContext, redraw_images: bool) -> Image {
        let mut image = self.image.lock();
        if redraw_images || image.is_none() {
            *image = Some(gc.draw_single_line_text_button(&self.label));
        }
        image
            .clone()
            .unwrap_or_else(|| gc.draw_single_line_text_button(&self.label))
    }

    fn pressed(&self) {
        self.switcher.attach_page(&self.id);
    }

    fn released(&self) {}

    fn attached(&self, ctx: Arc<dyn ButtonContext>) {
        self.base.attach(ctx);
    }

    fn detached(&self) {
        self.base.detach();
    }
}

/// Built-in factory for `hamdeck.Page` buttons.
pub struct PageButtonFactory {
    switcher: PageSwitcher,
}

impl PageButtonFactory {
    pub fn new(switcher: PageSwitcher) -> Self {
        Self { switcher }
    }
}

impl ButtonFactory for PageButtonFactory {
    fn create_button(&self, config: &ButtonConfig) -> Option<Arc<dyn Button>> {
        if config.kind() != Some(PAGE_BUTTON_TYPE) {
            return None;
        }

        // A missing page field is the legacy page; both are only worth a warning.
        let id = config.string(PAGE);
        if id.is_none() {
            warn!("a {PAGE_BUTTON_TYPE} button must have a page field");
        }
        let label = config.string(LABEL);
        if label.is_none() {
            warn!("a {PAGE_BUTTON_TYPE} button must have a label field");
        }

        Some(Arc::new(PageButton::new(
            self.switcher.clone(),
            id.unwrap_or_default(),
            label.unwrap_or_default(),
        )))
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Record;
    use serde_json::json;

    fn config(value: serde_json::Value) -> ButtonConfig {
        match value {
            serde_json::Value::Object(fields) => Record::new(fields),
            _ => unreachable!(),
        }
    }

    #[test]
    fn press_posts_page_switch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = PageButtonFactory::new(PageSwitcher::new(tx));
        let button = factory
            .create_button(&config(json!({
                "type": "hamdeck.Page", "index": 0, "page": "main", "label": "Main",
            })))
            .unwrap();

        button.pressed();
        button.released();

        assert_eq!(rx.try_recv().unwrap(), DeckCommand::AttachPage("main".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_page_means_legacy_page() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = PageButtonFactory::new(PageSwitcher::new(tx));
        let button = factory
            .create_button(&config(json!({"type": "hamdeck.Page", "index": 1})))
            .unwrap();

        button.pressed();
        assert_eq!(rx.try_recv().unwrap(), DeckCommand::AttachPage(String::new()));
    }

    #[test]
    fn other_types_are_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = PageButtonFactory::new(PageSwitcher::new(tx));
        assert!(factory
            .create_button(&config(json!({"type": "hamlib.MOX", "index": 1})))
            .is_none());
    }
}
