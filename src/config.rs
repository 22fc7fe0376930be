use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// What the host does when the instance lock can't be created or queried.
#[derive(Default, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationFallback {
    /// Run the viewer anyway, without listening for other launches
    #[serde(rename = "proceed_unguarded")]
    #[default]
    ProceedUnguarded,
    /// Report the error and exit
    #[serde(rename = "abort")]
    Abort,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub log_level: String,
    /// Bound on connecting to (and writing to) the primary instance.
    pub connect_timeout_ms: u64,
    /// Bound on waiting for a connected instance to deliver its line.
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub arbitration_fallback: ArbitrationFallback,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            connect_timeout_ms: 1000,
            read_timeout_ms: 5000,
            arbitration_fallback: ArbitrationFallback::default(),
        }
    }
}

const REQUIRED_FIELDS: [&str; 4] = [
    "log_level",
    "connect_timeout_ms",
    "read_timeout_ms",
    "arbitration_fallback",
];

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Saves the current Config instance to the specified file path.
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(data.as_bytes())?;
        log::info!("Config file saved at: {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_or_create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        if !path.as_ref().exists() {
            log::info!("Config file created at: {}", path.as_ref().display());
            let config = Self::default();
            config.save_to_file(&path)?;
            return Ok(config);
        }

        log::info!("Config file read from: {}", path.as_ref().display());

        let data = fs::read_to_string(&path)?;

        // Go through serde_json::Value first to handle missing fields gracefully
        let json_value: serde_json::Value = serde_json::from_str(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if Self::check_missing_fields(&json_value) {
            log::debug!("Configuration is missing fields - updating with defaults");

            let merged = Self::merge_with_defaults(json_value, &Self::default())?;

            log::debug!("Updating config file with missing fields");
            merged.save_to_file(&path)?;
            Ok(merged)
        } else {
            match serde_json::from_value(json_value) {
                Ok(cfg) => {
                    log::debug!("Configuration file loaded successfully");
                    Ok(cfg)
                }
                Err(err) => {
                    log::warn!("Error deserializing config: {}", err);
                    Err(io::Error::new(io::ErrorKind::InvalidData, err))
                }
            }
        }
    }

    /// Merges an existing config with default values, preserving existing settings
    /// while adding any missing fields from the default configuration.
    fn merge_with_defaults(existing: serde_json::Value, defaults: &Self) -> io::Result<Self> {
        let mut merged = serde_json::to_value(defaults)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let (Some(obj), Some(merged_obj)) = (existing.as_object(), merged.as_object_mut()) {
            for (key, value) in obj {
                if !value.is_null() {
                    merged_obj.insert(key.clone(), value.clone());
                }
            }
        }

        serde_json::from_value(merged).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Returns true if the JSON object lacks any field of the Config struct.
    fn check_missing_fields(json_value: &serde_json::Value) -> bool {
        let Some(obj) = json_value.as_object() else {
            return false;
        };
        match REQUIRED_FIELDS.iter().find(|field| !obj.contains_key(**field)) {
            Some(field) => {
                log::info!("Missing field '{}' in config", field);
                true
            }
            None => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbitration_fallback_serialization() {
        let json = serde_json::to_string(&ArbitrationFallback::ProceedUnguarded).unwrap();
        assert_eq!(json, "\"proceed_unguarded\"");

        let json = serde_json::to_string(&ArbitrationFallback::Abort).unwrap();
        assert_eq!(json, "\"abort\"");
    }

    #[test]
    fn test_arbitration_fallback_deserialization() {
        let fallback: ArbitrationFallback = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(fallback, ArbitrationFallback::Abort);

        let fallback: ArbitrationFallback =
            serde_json::from_str("\"proceed_unguarded\"").unwrap();
        assert_eq!(fallback, ArbitrationFallback::ProceedUnguarded);
    }
}
