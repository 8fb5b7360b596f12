use super::{to_bool, to_float, to_int, to_string, to_string_array};
use crate::connection::ConnectionName;
use serde_json::{Map, Value};

pub const MAIN_KEY: &str = "hamdeck";
pub const START_PAGE_ID: &str = "start_page";
pub const PAGES: &str = "pages";
pub const BUTTONS: &str = "buttons";
pub const CONNECTIONS: &str = "connections";
pub const TYPE: &str = "type";
pub const INDEX: &str = "index";
pub const CONNECTION: &str = "connection";
pub const LABEL: &str = "label";

/// A free-form configuration record (button or connection entry).
///
/// Field access is loosely typed: every getter returns `None` when the field
/// is absent or cannot be coerced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(Map<String, Value>);

/// A button entry of a page.
pub type ButtonConfig = Record;

/// A connection entry of the `connections` table.
pub type ConnectionConfig = Record;

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The dispatch key consumed by the button factories.
    pub fn kind(&self) -> Option<&str> {
        self.0.get(TYPE).and_then(Value::as_str)
    }

    pub fn index(&self) -> Option<i64> {
        self.int(INDEX)
    }

    /// The named backend connection; absent or empty means the legacy one.
    pub fn connection(&self) -> ConnectionName {
        ConnectionName::from(self.string(CONNECTION).as_deref())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(to_string)
    }

    /// String field with an empty-string default.
    pub fn string_or_default(&self, key: &str) -> String {
        self.string(key).unwrap_or_default()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(to_int)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(to_float)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(to_bool)
    }

    pub fn string_array(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(to_string_array)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
