//! Configuration model: the page-embedded carrier payload and the merge
//! semantics used by live updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type SoundId = String;

/// What a configured sound should play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Leave the page's own asset alone.
    Original,

    /// Play user-supplied inline data.
    Custom,

    /// Play a bundled preset file.
    Preset,
}

impl Default for Mode {
    fn default() -> Mode {
        Mode::Original
    }
}

/// Per-sound configuration. Field names follow the carrier payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoundConfig {
    pub path: Option<String>,
    pub paths: Vec<String>,
    pub mode: Mode,
    pub custom_data: Option<String>,
    pub preset_file: Option<String>,
}

impl SoundConfig {
    /// Every path that should map to this sound, main path first.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.path
            .as_deref()
            .into_iter()
            .chain(self.paths.iter().map(String::as_str))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub sounds: BTreeMap<SoundId, SoundConfig>,
}

impl Config {
    /// Parses the page-embedded carrier payload. A missing or malformed
    /// payload fails closed: substitution stays disabled.
    pub fn from_carrier(carrier: Option<&str>) -> Config {
        let json = match carrier {
            Some(json) => json,
            None => {
                log::info!("no embedded configuration found");
                return Config::default();
            }
        };

        match serde_json::from_str(json) {
            Ok(config) => config,
            Err(err) => {
                log::error!("failed to parse embedded configuration: {err}");
                Config::default()
            }
        }
    }

    /// Applies a live update. Top-level fields merge shallowly: `enabled` is
    /// overwritten when supplied, and each sound entry in the update replaces
    /// the existing entry for that id wholesale. Entries the update does not
    /// name are untouched.
    pub fn merge(&mut self, update: ConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }

        for (id, sound) in update.sounds {
            self.sounds.insert(id, sound);
        }
    }
}

/// The payload of a `CONFIG_UPDATED` message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub sounds: BTreeMap<SoundId, SoundConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_parses_full_payload() {
        let config = Config::from_carrier(Some(
            r#"{
                "enabled": true,
                "sounds": {
                    "incoming": {
                        "path": "/client/incoming.mp3",
                        "paths": ["/client/incoming.ogg"],
                        "mode": "custom",
                        "customData": "data:audio/mp3;base64,AAAA"
                    }
                }
            }"#,
        ));

        assert!(config.enabled);

        let sound = &config.sounds["incoming"];
        assert_eq!(sound.mode, Mode::Custom);
        assert_eq!(sound.custom_data.as_deref(), Some("data:audio/mp3;base64,AAAA"));
        assert_eq!(
            sound.all_paths().collect::<Vec<_>>(),
            vec!["/client/incoming.mp3", "/client/incoming.ogg"]
        );
    }

    #[test]
    fn missing_carrier_fails_closed() {
        let config = Config::from_carrier(None);
        assert!(!config.enabled);
        assert!(config.sounds.is_empty());
    }

    #[test]
    fn malformed_carrier_fails_closed() {
        let config = Config::from_carrier(Some("{not json"));
        assert!(!config.enabled);
    }

    #[test]
    fn unknown_mode_fails_closed() {
        let config = Config::from_carrier(Some(
            r#"{"enabled": true, "sounds": {"a": {"mode": "loud"}}}"#,
        ));
        assert!(!config.enabled);
    }

    #[test]
    fn merge_replaces_entries_wholesale() {
        let mut config = Config::from_carrier(Some(
            r#"{
                "enabled": true,
                "sounds": {
                    "incoming": {"path": "/old.mp3", "mode": "custom", "customData": "data:a"},
                    "doorbell": {"path": "/door.mp3", "mode": "preset", "presetFile": "ding.mp3"}
                }
            }"#,
        ));

        let update: ConfigUpdate = serde_json::from_str(
            r#"{"sounds": {"incoming": {"path": "/new.mp3", "mode": "original"}}}"#,
        )
        .unwrap();

        config.merge(update);

        // The named entry is replaced field-for-field, including fields the
        // update leaves at their defaults.
        let incoming = &config.sounds["incoming"];
        assert_eq!(incoming.path.as_deref(), Some("/new.mp3"));
        assert_eq!(incoming.mode, Mode::Original);
        assert_eq!(incoming.custom_data, None);

        // Entries the update does not name survive, and so does `enabled`.
        assert!(config.enabled);
        assert_eq!(config.sounds["doorbell"].preset_file.as_deref(), Some("ding.mp3"));
    }

    #[test]
    fn merge_applies_enabled_when_present() {
        let mut config = Config::from_carrier(Some(r#"{"enabled": true}"#));

        config.merge(ConfigUpdate {
            enabled: Some(false),
            sounds: BTreeMap::new(),
        });

        assert!(!config.enabled);
    }
}
