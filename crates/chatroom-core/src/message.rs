//! Chat message model and version ordering.
//!
//! A message is identified by its `serial`. Every update or delete produces a
//! new `version` of the same serial; versions are strings that order
//! lexicographically, so comparing two versions of one message is a string
//! comparison. Comparing versions of different serials is a caller error.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ChatError;

/// Header and metadata keys starting with this prefix are reserved.
pub const RESERVED_KEY_PREFIX: &str = "ably-chat";

/// Kind of event that produced a message version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageAction {
    /// Original message.
    Create,
    /// Text, metadata or headers replaced.
    Update,
    /// Soft-deleted.
    Delete,
}

impl MessageAction {
    /// Wire name of the action.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "message.create",
            Self::Update => "message.update",
            Self::Delete => "message.delete",
        }
    }

    /// Parse a wire action name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "message.create" => Some(Self::Create),
            "message.update" => Some(Self::Update),
            "message.delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A chat message at one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Identity of the message across versions.
    pub serial: String,
    /// Author.
    pub client_id: String,
    /// Body text.
    pub text: String,
    /// Application metadata, not interpreted by the service.
    pub metadata: Map<String, Value>,
    /// Application headers, usable by server-side filters.
    pub headers: Map<String, Value>,
    /// Action that produced this version.
    pub action: MessageAction,
    /// Version serial; equals `serial` for the original.
    pub version: String,
    /// When this version was produced.
    pub timestamp: DateTime<Utc>,
    /// When the original was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this version was produced by a delete.
    pub fn is_deleted(&self) -> bool {
        self.action == MessageAction::Delete
    }

    /// Whether this version was produced by an update.
    pub fn is_updated(&self) -> bool {
        self.action == MessageAction::Update
    }

    fn compare_version(&self, other: &Self) -> Result<Ordering, ChatError> {
        if self.serial != other.serial {
            return Err(ChatError::InvalidArgument(format!(
                "cannot compare versions of different messages: {} and {}",
                self.serial, other.serial
            )));
        }
        Ok(self.version.cmp(&other.version))
    }

    /// Whether `other` is the same version of the same message.
    pub fn is_same_version_as(&self, other: &Self) -> Result<bool, ChatError> {
        self.compare_version(other).map(Ordering::is_eq)
    }

    /// Whether this is an older version of `other`.
    pub fn is_older_version_of(&self, other: &Self) -> Result<bool, ChatError> {
        self.compare_version(other).map(Ordering::is_lt)
    }

    /// Whether this is a newer version of `other`.
    pub fn is_newer_version_of(&self, other: &Self) -> Result<bool, ChatError> {
        self.compare_version(other).map(Ordering::is_gt)
    }

    /// Apply an update or delete event to this message.
    ///
    /// Returns the event's message when it is newer, otherwise this message
    /// unchanged. Create events and events for another serial are rejected.
    pub fn with(&self, event: &MessageEvent) -> Result<Self, ChatError> {
        if event.kind == MessageAction::Create {
            return Err(ChatError::InvalidArgument(
                "cannot apply a created event to a message".to_string(),
            ));
        }

        if event.message.serial != self.serial {
            return Err(ChatError::InvalidArgument(
                "cannot apply event for a different message".to_string(),
            ));
        }

        if event.message.is_newer_version_of(self)? {
            Ok(event.message.clone())
        } else {
            Ok(self.clone())
        }
    }
}

/// A message event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Which action produced the event.
    pub kind: MessageAction,
    /// The message at the event's version.
    pub message: Message,
}

/// Reject reserved keys in a header or metadata map.
pub(crate) fn check_reserved_keys(kind: &str, map: &Map<String, Value>) -> Result<(), ChatError> {
    match map.keys().find(|key| key.starts_with(RESERVED_KEY_PREFIX)) {
        Some(key) => Err(ChatError::InvalidArgument(format!(
            "{kind} key {key:?} uses reserved prefix {RESERVED_KEY_PREFIX:?}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(serial: &str, version: &str, action: MessageAction) -> Message {
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default();
        Message {
            serial: serial.to_string(),
            client_id: "alice".to_string(),
            text: format!("text@{version}"),
            metadata: Map::new(),
            headers: Map::new(),
            action,
            version: version.to_string(),
            timestamp: at,
            created_at: at,
        }
    }

    #[test]
    fn version_comparisons() {
        let original = message("01a", "01a", MessageAction::Create);
        let updated = message("01a", "01b", MessageAction::Update);

        assert_eq!(original.is_older_version_of(&updated), Ok(true));
        assert_eq!(updated.is_newer_version_of(&original), Ok(true));
        assert_eq!(original.is_same_version_as(&original.clone()), Ok(true));
        assert_eq!(updated.is_older_version_of(&original), Ok(false));
    }

    #[test]
    fn comparing_different_serials_fails() {
        let a = message("01a", "01a", MessageAction::Create);
        let b = message("02a", "02a", MessageAction::Create);
        assert!(matches!(a.is_newer_version_of(&b), Err(ChatError::InvalidArgument(_))));
    }

    #[test]
    fn with_applies_newer_update() {
        let original = message("01a", "01a", MessageAction::Create);
        let event = MessageEvent {
            kind: MessageAction::Update,
            message: message("01a", "01c", MessageAction::Update),
        };

        let applied = original.with(&event).unwrap();
        assert_eq!(applied.version, "01c");
        assert!(applied.is_updated());
    }

    #[test]
    fn with_ignores_stale_event() {
        let current = message("01a", "01c", MessageAction::Update);
        let stale = MessageEvent {
            kind: MessageAction::Delete,
            message: message("01a", "01b", MessageAction::Delete),
        };

        assert_eq!(current.with(&stale).unwrap(), current);
    }

    #[test]
    fn with_rejects_create_and_foreign_serial() {
        let original = message("01a", "01a", MessageAction::Create);

        let created = MessageEvent {
            kind: MessageAction::Create,
            message: message("01a", "01z", MessageAction::Create),
        };
        assert!(original.with(&created).is_err());

        let foreign = MessageEvent {
            kind: MessageAction::Update,
            message: message("09z", "09z", MessageAction::Update),
        };
        assert!(original.with(&foreign).is_err());
    }

    #[test]
    fn reserved_keys_rejected() {
        let mut headers = Map::new();
        headers.insert("ably-chat-x".to_string(), Value::Bool(true));
        assert!(check_reserved_keys("header", &headers).is_err());

        let mut headers = Map::new();
        headers.insert("chat-ably".to_string(), Value::Bool(true));
        assert!(check_reserved_keys("header", &headers).is_ok());
    }

    #[test]
    fn action_names_round_trip() {
        for action in [MessageAction::Create, MessageAction::Update, MessageAction::Delete] {
            assert_eq!(MessageAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(MessageAction::parse("message.summary"), None);
    }
}
