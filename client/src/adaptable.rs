//! The wire-independent message shape every inbound and outbound frame is
//! converted to and from by the external [`crate::adapter::ProtocolAdapter`].
//!
//! The session engine never inspects the domain payload beyond the fields
//! declared here: group, channel, entity id, criterion and action live in
//! the topic path, everything else is opaque JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two top-level resource groups the protocol addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Things,
    Policies,
}

/// The channel an adaptable travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Twin,
    Live,
    None,
}

/// What kind of traffic the adaptable represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Commands,
    Events,
    Messages,
    Errors,
}

/// The destination path of an adaptable: which entity, on which channel, for
/// which kind of traffic, doing what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    pub group: Group,
    pub channel: Channel,
    pub entity_id: String,
    pub criterion: Criterion,
    pub action: String,
}

impl TopicPath {
    pub fn new(
        group: Group,
        channel: Channel,
        entity_id: impl Into<String>,
        criterion: Criterion,
        action: impl Into<String>,
    ) -> Self {
        Self {
            group,
            channel,
            entity_id: entity_id.into(),
            criterion,
            action: action.into(),
        }
    }
}

/// The header most callers care about: `correlation-id`. The rest travel as
/// an open string map since the session engine never needs to parse them.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";
pub const CHANNEL_HEADER: &str = "channel";
pub const READ_SUBJECTS_HEADER: &str = "read-subjects";
pub const AUTHORIZATION_CONTEXT_HEADER: &str = "authorization-context";
pub const RESPONSE_REQUIRED_HEADER: &str = "response-required";

/// An opaque protocol frame, once converted out of its wire text form.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptable {
    pub topic_path: TopicPath,
    pub headers: HashMap<String, String>,
    pub payload: Value,
    pub extra: Option<Value>,
}

impl Adaptable {
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(CORRELATION_ID_HEADER).map(String::as_str)
    }

    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.headers
            .insert(CORRELATION_ID_HEADER.to_string(), correlation_id.into());
    }

    /// Rewrite this adaptable's headers for the `live` channel: set
    /// `channel = live` and strip the three headers that are meaningful only
    /// to the gateway and must not be forwarded on a live-channel command.
    pub fn rewrite_for_live_channel(&mut self) {
        self.topic_path.channel = Channel::Live;
        self.headers
            .insert(CHANNEL_HEADER.to_string(), "live".to_string());
        self.headers.remove(READ_SUBJECTS_HEADER);
        self.headers.remove(AUTHORIZATION_CONTEXT_HEADER);
        self.headers.remove(RESPONSE_REQUIRED_HEADER);
    }
}

/// The asynchronous event classes a caller may subscribe to on the
/// [`crate::bus::AdaptableBus`]. Distinct from [`Criterion`]: a streaming
/// type also encodes which channel the traffic runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamingType {
    LiveCommand,
    LiveEvent,
    LiveMessage,
    TwinEvent,
    PolicyAnnouncement,
}

impl StreamingType {
    /// Classify an adaptable's topic path into a streaming type, if any of
    /// the five recognised classes applies.
    pub fn classify(topic_path: &TopicPath) -> Option<Self> {
        use Channel::*;
        use Criterion::*;
        use Group::*;
        match (topic_path.group, topic_path.channel, topic_path.criterion) {
            (Things, Live, Commands) => Some(StreamingType::LiveCommand),
            (Things, Live, Events) => Some(StreamingType::LiveEvent),
            (Things, Live, Messages) => Some(StreamingType::LiveMessage),
            (Things, Twin, Events) => Some(StreamingType::TwinEvent),
            (Policies, _, Events) => Some(StreamingType::PolicyAnnouncement),
            _ => Option::None,
        }
    }
}

/// A classification used as a subscription key on the Adaptable Bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Matches an adaptable whose `correlation-id` header equals the string.
    /// One-shot.
    CorrelationId(String),
    /// Matches a bare text frame equal to the string. One-shot, exclusive.
    ProtocolString(String),
    /// Matches any adaptable of the given streaming type. Long-lived.
    StreamingType(StreamingType),
}
