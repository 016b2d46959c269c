//! Stream Messages
//!
//! Every non-blank line on the wire is one JSON object. The payload schema
//! is owned by the API, so messages keep their decoded `serde_json::Value`
//! and are only classified by the top-level key that identifies the kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Message
// =============================================================================

/// A decoded unit from the stream, handed once to the delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// A status update.
    Tweet(Value),
    /// A direct message.
    DirectMessage(Value),
    /// Notice that a status was deleted.
    StatusDeletion(Value),
    /// Notice that location data should be scrubbed.
    LocationDeletion(Value),
    /// Notice that the stream matched more statuses than it delivered.
    StreamLimit(Value),
    /// A status withheld in certain countries.
    StatusWithheld(Value),
    /// A user withheld in certain countries.
    UserWithheld(Value),
    /// The server is about to close the connection.
    StreamDisconnect(DisconnectNotice),
    /// The client is falling behind and risks disconnection.
    StallWarning(Value),
    /// Friend id preamble sent at the start of user streams.
    FriendsList(Value),
    /// A user-level event (follow, favorite, ...).
    Event(Value),
    /// Any object without a recognized top-level key.
    Other(Value),
    /// A line that could not be decoded. The connection stays up.
    Malformed(MalformedLine),
}

/// Payload of a `disconnect` control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectNotice {
    /// Numeric disconnect reason.
    pub code: i64,
    /// Name of the stream being disconnected.
    #[serde(default)]
    pub stream_name: String,
    /// Human readable reason.
    #[serde(default)]
    pub reason: String,
}

/// A single line that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedLine {
    /// The raw line, lossily converted to UTF-8.
    pub line: String,
    /// Decoder error description.
    pub error: String,
}

/// Message kind, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// See [`Message::Tweet`].
    Tweet,
    /// See [`Message::DirectMessage`].
    DirectMessage,
    /// See [`Message::StatusDeletion`].
    StatusDeletion,
    /// See [`Message::LocationDeletion`].
    LocationDeletion,
    /// See [`Message::StreamLimit`].
    StreamLimit,
    /// See [`Message::StatusWithheld`].
    StatusWithheld,
    /// See [`Message::UserWithheld`].
    UserWithheld,
    /// See [`Message::StreamDisconnect`].
    StreamDisconnect,
    /// See [`Message::StallWarning`].
    StallWarning,
    /// See [`Message::FriendsList`].
    FriendsList,
    /// See [`Message::Event`].
    Event,
    /// See [`Message::Other`].
    Other,
    /// See [`Message::Malformed`].
    Malformed,
}

impl MessageKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tweet => "tweet",
            Self::DirectMessage => "direct_message",
            Self::StatusDeletion => "status_deletion",
            Self::LocationDeletion => "location_deletion",
            Self::StreamLimit => "stream_limit",
            Self::StatusWithheld => "status_withheld",
            Self::UserWithheld => "user_withheld",
            Self::StreamDisconnect => "stream_disconnect",
            Self::StallWarning => "stall_warning",
            Self::FriendsList => "friends_list",
            Self::Event => "event",
            Self::Other => "other",
            Self::Malformed => "malformed",
        }
    }
}

impl Message {
    /// Classify a decoded JSON value by its top-level key.
    ///
    /// Control messages are checked before tweets since a tweet never
    /// carries those keys at the top level.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Other(value);
        };

        if let Some(notice) = object.get("disconnect") {
            return match serde_json::from_value::<DisconnectNotice>(notice.clone()) {
                Ok(notice) => Self::StreamDisconnect(notice),
                Err(_) => Self::Other(value),
            };
        }

        let has = |key: &str| object.contains_key(key);

        if has("warning") {
            Self::StallWarning(value)
        } else if has("delete") {
            Self::StatusDeletion(value)
        } else if has("scrub_geo") {
            Self::LocationDeletion(value)
        } else if has("limit") {
            Self::StreamLimit(value)
        } else if has("status_withheld") {
            Self::StatusWithheld(value)
        } else if has("user_withheld") {
            Self::UserWithheld(value)
        } else if has("direct_message") {
            Self::DirectMessage(value)
        } else if has("friends") || has("friends_str") {
            Self::FriendsList(value)
        } else if has("event") {
            Self::Event(value)
        } else if has("retweet_count") || has("text") || has("full_text") {
            Self::Tweet(value)
        } else {
            Self::Other(value)
        }
    }

    /// The kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Tweet(_) => MessageKind::Tweet,
            Self::DirectMessage(_) => MessageKind::DirectMessage,
            Self::StatusDeletion(_) => MessageKind::StatusDeletion,
            Self::LocationDeletion(_) => MessageKind::LocationDeletion,
            Self::StreamLimit(_) => MessageKind::StreamLimit,
            Self::StatusWithheld(_) => MessageKind::StatusWithheld,
            Self::UserWithheld(_) => MessageKind::UserWithheld,
            Self::StreamDisconnect(_) => MessageKind::StreamDisconnect,
            Self::StallWarning(_) => MessageKind::StallWarning,
            Self::FriendsList(_) => MessageKind::FriendsList,
            Self::Event(_) => MessageKind::Event,
            Self::Other(_) => MessageKind::Other,
            Self::Malformed(_) => MessageKind::Malformed,
        }
    }

    /// The decoded JSON payload, if the message carries one as-is.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Tweet(v)
            | Self::DirectMessage(v)
            | Self::StatusDeletion(v)
            | Self::LocationDeletion(v)
            | Self::StreamLimit(v)
            | Self::StatusWithheld(v)
            | Self::UserWithheld(v)
            | Self::StallWarning(v)
            | Self::FriendsList(v)
            | Self::Event(v)
            | Self::Other(v) => Some(v),
            Self::StreamDisconnect(_) | Self::Malformed(_) => None,
        }
    }

    /// Whether this message reports a decode failure.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
