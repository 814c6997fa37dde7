//! System event types broadcast on the event bus

use serde::{Deserialize, Serialize};

/// Gateway events, serialized as `{"event": "<name>", "data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// Robot session moved between lifecycle states
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// "disconnected", "connecting", "connected" or "degraded"
        state: String,
        previous: String,
    },

    /// A command was handed to an executable or the control channel
    #[serde(rename = "command.dispatched")]
    CommandDispatched {
        /// Command domain: "arm", "led", "walk", "posture", "balance", "playback"
        kind: String,
        /// Resolved parameters, e.g. "hug (19)" or "(255,0,0)"
        detail: String,
        success: bool,
    },

    /// Upload transcoded and queued for playback
    #[serde(rename = "audio.uploaded")]
    AudioUploaded {
        url: String,
        /// Transcoded output already existed for identical content
        reused: bool,
    },

    /// Capture loop started or stopped
    #[serde(rename = "stream.state_changed")]
    StreamStateChanged { state: String, device: String },

    /// Number of attached MJPEG clients changed
    #[serde(rename = "stream.clients_changed")]
    StreamClientsChanged { clients: usize },

    #[serde(rename = "system.error")]
    SystemError { module: String, message: String },
}

impl SystemEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::CommandDispatched { .. } => "command.dispatched",
            Self::AudioUploaded { .. } => "audio.uploaded",
            Self::StreamStateChanged { .. } => "stream.state_changed",
            Self::StreamClientsChanged { .. } => "stream.clients_changed",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Topic filter: `*`, an exact name, or a `prefix.*` pattern
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }
        let name = self.event_name();
        match topic.strip_suffix(".*") {
            Some(prefix) => name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.')),
            None => name == topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::SessionStateChanged {
            state: "connected".to_string(),
            previous: "connecting".to_string(),
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("session.*"));
        assert!(event.matches_topic("session.state_changed"));
        assert!(!event.matches_topic("stream.*"));
        assert!(!event.matches_topic("sess.*"));
    }

    #[test]
    fn test_serialization_shape() {
        let event = SystemEvent::CommandDispatched {
            kind: "led".to_string(),
            detail: "(255,0,0)".to_string(),
            success: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "command.dispatched");
        assert_eq!(value["data"]["detail"], "(255,0,0)");

        let back: SystemEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.event_name(), "command.dispatched");
    }
}
