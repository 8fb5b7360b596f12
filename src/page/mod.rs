use crate::button::Button;
use std::sync::Arc;

/// Id of the page built from the flat top-level `buttons` list.
pub const LEGACY_PAGE_ID: &str = "";

/// A fixed-size bank of buttons, one slot per key.
///
/// Empty slots show the deck's empty tile when the page is attached.
#[derive(Clone)]
pub struct Page {
    slots: Vec<Option<Arc<dyn Button>>>,
}

impl Page {
    pub fn new(slots: Vec<Option<Arc<dyn Button>>>) -> Self {
        Self { slots }
    }

    pub fn empty(button_count: usize) -> Self {
        Self {
            slots: vec![None; button_count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn button(&self, index: usize) -> Option<&Arc<dyn Button>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slots(&self) -> &[Option<Arc<dyn Button>>] {
        &self.slots
    }

    /// Number of occupied slots.
    pub fn button_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::EmptyButton;
    use crate::render::{GraphicContext, Theme};

    #[test]
    fn empty_page_has_all_slots() {
        let page = Page::empty(15);
        assert_eq!(page.len(), 15);
        assert_eq!(page.button_count(), 0);
        assert!(page.button(3).is_none());
        assert!(page.button(99).is_none());
    }

    #[test]
    fn occupied_slots_are_counted() {
        let mut gc = GraphicContext::new(72, Theme::default());
        let button: Arc<dyn Button> = Arc::new(EmptyButton::new(&mut gc));
        let mut slots = vec![None; 6];
        slots[2] = Some(button.clone());

        let page = Page::new(slots);
        assert_eq!(page.button_count(), 1);
        assert!(Arc::ptr_eq(page.button(2).unwrap(), &button));
    }
}
