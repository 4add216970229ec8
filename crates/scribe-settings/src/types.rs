//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every struct is `#[serde(default)]`
//! so a partial settings file only overrides what it mentions.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScribeSettings {
    pub store: StoreSettings,
    pub relay: RelaySettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

impl ScribeSettings {
    /// Reject values that would make the engine misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.relay.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.channelCapacity must be greater than zero".into(),
            ));
        }
        if self.relay.subscriber_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.subscriberQueue must be greater than zero".into(),
            ));
        }
        if self.engine.run_lease_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.runLeaseSecs must be greater than zero".into(),
            ));
        }
        if self.engine.title_max_chars < 8 {
            return Err(SettingsError::InvalidValue(
                "engine.titleMaxChars must be at least 8".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite database path. Empty means `~/.scribe/scribe.db`.
    pub database_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Capacity of the broadcast channel events are relayed on.
    pub channel_capacity: usize,
    /// Per-subscriber queue length. A full queue holds up delivery until
    /// the subscriber reads.
    pub subscriber_queue: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            subscriber_queue: 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Generate a title from the first prompt of an untitled session.
    pub generate_titles: bool,
    pub title_max_chars: usize,
    /// Agent runtime executable used by `scribe chat --command`.
    pub runtime_command: String,
    pub runtime_args: Vec<String>,
    /// Lifetime of a session's run lease. Renewed while the run is alive,
    /// so it only bounds how long a crashed run keeps the session busy.
    pub run_lease_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generate_titles: true,
            title_max_chars: 60,
            runtime_command: "claude".to_string(),
            runtime_args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            run_lease_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let s = ScribeSettings::default();
        assert!(s.store.database_path.is_empty());
        assert_eq!(s.relay.channel_capacity, 1024);
        assert_eq!(s.relay.subscriber_queue, 256);
        assert!(s.engine.generate_titles);
        assert_eq!(s.engine.runtime_command, "claude");
        assert_eq!(s.engine.run_lease_secs, 30);
        assert_eq!(s.logging.level, "info");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(ScribeSettings::default()).unwrap();
        assert!(json["relay"]["channelCapacity"].is_number());
        assert!(json["engine"]["titleMaxChars"].is_number());
        assert!(json["store"]["databasePath"].is_string());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ScribeSettings =
            serde_json::from_str(r#"{"relay": {"subscriberQueue": 8}}"#).unwrap();
        assert_eq!(s.relay.subscriber_queue, 8);
        assert_eq!(s.relay.channel_capacity, 1024);
        assert_eq!(s.logging, LoggingSettings::default());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut s = ScribeSettings::default();
        s.relay.channel_capacity = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_lease() {
        let mut s = ScribeSettings::default();
        s.engine.run_lease_secs = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(ref m)) if m.contains("runLeaseSecs"));
    }
}
