//! JSON configuration files carried as package overrides.

use dp_config::ConfigFileOverride;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

pub fn to_override<T: Serialize>(name: &str, value: &T) -> Result<ConfigFileOverride> {
    Ok(ConfigFileOverride::new(name, serde_json::to_string_pretty(value)?))
}

pub fn from_override<T: DeserializeOwned>(config_override: &ConfigFileOverride) -> Result<T> {
    Ok(serde_json::from_str(&config_override.file_contents_json)?)
}

/// Last override with the given name wins, matching how files are stamped in
/// order at deploy time.
pub fn find<'a>(overrides: &'a [ConfigFileOverride], name: &str) -> Option<&'a ConfigFileOverride> {
    overrides
        .iter()
        .rev()
        .find(|o| o.file_name_without_extension == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Database {
        server: String,
        port: u16,
    }

    #[test]
    fn round_trips_and_finds_latest() {
        let first = to_override("Database", &Database { server: "a".into(), port: 1 }).unwrap();
        let second = to_override("Database", &Database { server: "b".into(), port: 2 }).unwrap();
        let overrides = [first, ConfigFileOverride::new("Other", "{}"), second];

        let found: Database = from_override(find(&overrides, "Database").unwrap()).unwrap();
        assert_eq!(found, Database { server: "b".into(), port: 2 });
        assert!(find(&overrides, "Missing").is_none());
    }
}
