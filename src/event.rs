/// A key transition reported by the device (index is 0-based, row-major).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub index: usize,
    pub pressed: bool,
}

impl Key {
    pub const fn pressed(index: usize) -> Self {
        Self {
            index,
            pressed: true,
        }
    }

    pub const fn released(index: usize) -> Self {
        Self {
            index,
            pressed: false,
        }
    }
}

/// Requests posted to the deck loop from buttons and their handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckCommand {
    /// Re-render one slot, optionally regenerating the button's cached images.
    Redraw { index: usize, redraw_images: bool },

    /// Activate a page by id.
    AttachPage(String),
}
