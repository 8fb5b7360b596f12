use std::path::PathBuf;

/// Central error type for hamdeck.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no page defined with name '{0}'")]
    PageNotFound(String),

    #[error("no {kind} connection defined with name {name}")]
    ConnectionNotFound { kind: String, name: String },

    #[error("no legacy {0} connection defined")]
    NoLegacyConnection(String),

    #[error("{index} is not a valid button index in [0, {count})")]
    InvalidIndex { index: usize, count: usize },

    #[error("no Stream Deck found")]
    NoDevice,

    #[error("no Stream Deck found with serial {0}")]
    DeviceNotFound(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("HID error: {0}")]
    Hid(String),

    #[error("icon error: {path}: {source}")]
    Icon {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("render error: {0}")]
    Render(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("{kind} connection error: {message}")]
    Connection { kind: String, message: String },

    #[error("{kind} protocol error: {message}")]
    Protocol { kind: String, message: String },
}

impl DeckError {
    pub fn connection(kind: &str, message: impl ToString) -> Self {
        Self::Connection {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    pub fn protocol(kind: &str, message: impl ToString) -> Self {
        Self::Protocol {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeckError>;
