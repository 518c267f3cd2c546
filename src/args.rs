use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::debug;

pub const SERVER_ADDRESS: &str = "ServerAddress";
pub const STATUS: &str = "Status";

/// Keys that must be present before anything is sent
const REQUIRED_KEYS: [&str; 2] = [SERVER_ADDRESS, STATUS];

/// Named event arguments, looked up case-insensitively
#[derive(Debug, Clone, Default)]
pub struct EventArgs {
    values: HashMap<String, String>,
}

impl EventArgs {
    /// Pair tokens as `name value name value ...`.
    ///
    /// The first occurrence of a name wins. A trailing token without a value is dropped.
    pub fn from_pairs<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = HashMap::new();
        let mut tokens = tokens.into_iter().map(Into::into);

        while let (Some(name), Some(value)) = (tokens.next(), tokens.next()) {
            let key = normalize(&name);
            if values.contains_key(&key) {
                debug!("Ignoring duplicate argument {}", name);
                continue;
            }
            values.insert(key, value);
        }

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&normalize(name)).map(String::as_str)
    }

    /// Missing arguments read as the empty string
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// Fails when any required argument is absent, naming all of them
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Missing required argument(s): {}", missing.join(", ")))
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase()
}
