use super::Deck;
use crate::button::Button;
use crate::config::schema::{self, ConnectionConfig, Record};
use crate::config::read_document;
use crate::error::{DeckError, Result};
use crate::page::{Page, LEGACY_PAGE_ID};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};

impl Deck {
    /// Load connections and pages from a configuration document and attach
    /// the start page.
    ///
    /// Broken button entries are logged and skipped; only structural problems
    /// of the document fail the whole load.
    ///
    /// # Errors
    /// Returns `DeckError::Config` / `DeckError::Json` for malformed documents,
    /// pages that are not records or have no buttons list, and
    /// `DeckError::PageNotFound` if the start page does not exist.
    pub fn read_config<R: Read>(&mut self, reader: R) -> Result<()> {
        let root = read_document(reader)?;

        self.buttons_per_factory = vec![0; self.factories.len()];
        self.pages.clear();

        let connections = match root.get(schema::CONNECTIONS) {
            Some(Value::Object(connections)) => load_connections(connections),
            _ => HashMap::new(),
        };
        info!("{} connections configured", connections.len());
        self.connections.replace(connections);

        self.start_page_id = root
            .get(schema::START_PAGE_ID)
            .and_then(Value::as_str)
            .unwrap_or(LEGACY_PAGE_ID)
            .to_string();

        if let Some(Value::Object(pages)) = root.get(schema::PAGES) {
            for (id, page) in pages {
                let Value::Object(page) = page else {
                    return Err(DeckError::Config(format!("{id} is not a valid page")));
                };
                let page = self.load_page(id, page)?;
                self.pages.insert(id.clone(), page);
            }
        }

        match root.get(schema::BUTTONS) {
            Some(Value::Array(buttons)) => {
                let page = Page::new(self.load_buttons(buttons));
                self.pages.insert(LEGACY_PAGE_ID.to_string(), page);
            }
            _ if self.pages.is_empty() => {
                self.pages
                    .insert(LEGACY_PAGE_ID.to_string(), Page::empty(self.buttons.len()));
            }
            _ => {}
        }

        info!(
            "{} pages configured, starting with '{}'",
            self.pages.len(),
            self.start_page_id
        );
        let start_page_id = self.start_page_id.clone();
        self.attach_page(&start_page_id)
    }

    fn load_page(&mut self, id: &str, page: &Map<String, Value>) -> Result<Page> {
        match page.get(schema::BUTTONS) {
            Some(Value::Array(buttons)) => Ok(Page::new(self.load_buttons(buttons))),
            _ => Err(DeckError::Config(format!("page {id} has no buttons defined"))),
        }
    }

    fn load_buttons(&mut self, configs: &[Value]) -> Vec<Option<Arc<dyn Button>>> {
        let count = self.buttons.len();
        let mut slots: Vec<Option<Arc<dyn Button>>> = vec![None; count];

        for (i, raw) in configs.iter().enumerate() {
            let Value::Object(fields) = raw else {
                warn!("buttons[{i}] is not a button object");
                continue;
            };
            let config = Record::new(fields.clone());

            let Some(index) = config.index() else {
                warn!("buttons[{i}] has no valid index");
                continue;
            };
            let Some(index) = usize::try_from(index).ok().filter(|&index| index < count) else {
                warn!("buttons[{i}]: {index} is not a valid button index in [0, {count})");
                continue;
            };

            let created = self
                .factories
                .iter()
                .enumerate()
                .find_map(|(j, factory)| factory.create_button(&config).map(|button| (j, button)));
            let Some((factory, button)) = created else {
                warn!(
                    "no factory found for buttons[{i}] of type {}",
                    config.kind().unwrap_or("<none>")
                );
                continue;
            };

            self.buttons_per_factory[factory] += 1;
            slots[index] = Some(button);
        }

        slots
    }
}

fn load_connections(connections: &Map<String, Value>) -> HashMap<(String, String), ConnectionConfig> {
    let mut result = HashMap::new();
    for (name, raw) in connections {
        if name.is_empty() {
            warn!("the empty connection name is reserved for the command line connection");
            continue;
        }
        let Value::Object(fields) = raw else {
            warn!("{name} is not a valid connection configuration");
            continue;
        };
        let config = ConnectionConfig::new(fields.clone());
        let Some(kind) = config.string(schema::TYPE) else {
            warn!("connection {name} needs a type");
            continue;
        };
        result.insert((name.clone(), kind), config);
    }
    result
}
