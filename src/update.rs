//! Live reconfiguration: a single-consumer channel of window messages,
//! validated and applied strictly in order.

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use serde::Deserialize;

use crate::config::ConfigUpdate;
use crate::host::WindowId;
use crate::resolve::Resolver;

/// Discriminator carried by every legitimate update message.
pub const MESSAGE_SOURCE: &str = "resound-content";

/// Message type announcing new configuration.
pub const CONFIG_UPDATED: &str = "CONFIG_UPDATED";

/// A message event as the page sees it: the sending window plus its payload.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub sender: WindowId,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    source: Option<String>,

    #[serde(default, rename = "type")]
    kind: Option<String>,

    #[serde(default)]
    config: Option<ConfigUpdate>,
}

/// Validates and applies a single message. Anything that is not a
/// well-formed update from the page's own window is dropped without side
/// effects, so other scripts cannot spoof a reconfiguration.
pub fn handle_message(resolver: &Resolver, own_window: WindowId, message: &WindowMessage) {
    if message.sender != own_window {
        log::debug!("dropping message from foreign window {}", message.sender);
        return;
    }

    let envelope: Envelope = match serde_json::from_value(message.data.clone()) {
        Ok(envelope) => envelope,
        Err(_) => return,
    };

    if envelope.source.as_deref() != Some(MESSAGE_SOURCE) {
        return;
    }

    if envelope.kind.as_deref() != Some(CONFIG_UPDATED) {
        return;
    }

    let update = match envelope.config {
        Some(update) => update,
        None => return,
    };

    resolver.apply_update(update);
}

/// Spawns the listener. Messages sent on the returned sender are processed
/// one at a time, in arrival order, so an update handled between two
/// resolutions affects the second and never the first. The thread ends when
/// the sender side is dropped.
pub fn spawn(
    resolver: Arc<Resolver>,
    own_window: WindowId,
) -> (mpsc::Sender<WindowMessage>, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel::<WindowMessage>();

    let handle = thread::spawn(move || {
        while let Ok(message) = receiver.recv() {
            handle_message(&resolver, own_window, &message);
        }
    });

    (sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode, SoundConfig};
    use crate::host::Source;
    use serde_json::json;

    fn resolver() -> Resolver {
        let mut config = Config::default();
        config.enabled = true;
        config.sounds.insert(
            "incoming".to_string(),
            SoundConfig {
                path: Some("/old.mp3".to_string()),
                mode: Mode::Custom,
                custom_data: Some("data:old".to_string()),
                ..SoundConfig::default()
            },
        );

        Resolver::new(config, "https://host.example/app", None)
    }

    fn valid_payload() -> serde_json::Value {
        json!({
            "source": MESSAGE_SOURCE,
            "type": CONFIG_UPDATED,
            "config": {
                "sounds": {
                    "incoming": {
                        "path": "/new.mp3",
                        "mode": "custom",
                        "customData": "data:new"
                    }
                }
            }
        })
    }

    #[test]
    fn valid_update_is_applied() {
        let resolver = resolver();

        handle_message(&resolver, 1, &WindowMessage { sender: 1, data: valid_payload() });

        assert_eq!(resolver.resolve_sound_id(&Source::Url("/old.mp3".into())), None);
        assert_eq!(
            resolver.resolve_sound_id(&Source::Url("/new.mp3".into())).as_deref(),
            Some("incoming")
        );
    }

    #[test]
    fn foreign_window_is_ignored() {
        let resolver = resolver();

        handle_message(&resolver, 1, &WindowMessage { sender: 2, data: valid_payload() });

        assert_eq!(
            resolver.resolve_sound_id(&Source::Url("/old.mp3".into())).as_deref(),
            Some("incoming")
        );
    }

    #[test]
    fn malformed_messages_are_ignored() {
        let resolver = resolver();

        for data in [
            json!({"type": CONFIG_UPDATED, "config": {}}),
            json!({"source": "someone-else", "type": CONFIG_UPDATED, "config": {}}),
            json!({"source": MESSAGE_SOURCE, "type": "PING"}),
            json!({"source": MESSAGE_SOURCE, "type": CONFIG_UPDATED}),
            json!("not an object"),
        ] {
            handle_message(&resolver, 1, &WindowMessage { sender: 1, data });
        }

        assert_eq!(
            resolver.resolve_sound_id(&Source::Url("/old.mp3".into())).as_deref(),
            Some("incoming")
        );
    }

    #[test]
    fn updates_order_against_resolutions() {
        let resolver = resolver();

        let before = resolver.resolve_source("incoming");
        handle_message(&resolver, 1, &WindowMessage { sender: 1, data: valid_payload() });
        let after = resolver.resolve_source("incoming");

        assert_eq!(before.unwrap().as_str(), "data:old");
        assert_eq!(after.unwrap().as_str(), "data:new");
    }
}
