//! Identifier and position types shared by the control and data envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stream classifiers that may trail a stream URN.
///
/// `urn:example:user=42:personalStream` and `urn:example:user=42` name the
/// same logical stream; the classifier is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classifier {
    TopicStream,
    PersonalStream,
    CollectionStream,
}

impl Classifier {
    pub const ALL: [Classifier; 3] = [
        Classifier::TopicStream,
        Classifier::PersonalStream,
        Classifier::CollectionStream,
    ];

    /// The `:`-prefixed marker as it appears inside a URN
    pub fn marker(&self) -> &'static str {
        match self {
            Classifier::TopicStream => ":topicStream",
            Classifier::PersonalStream => ":personalStream",
            Classifier::CollectionStream => ":collectionStream",
        }
    }
}

/// Identifier of a logical stream multiplexed over the session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamUrn(String);

impl StreamUrn {
    pub fn new(urn: impl Into<String>) -> Self {
        Self(urn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The classifier carried by this URN, if any
    pub fn classifier(&self) -> Option<Classifier> {
        self.classifier_span().map(|(_, _, classifier)| classifier)
    }

    /// The URN with its first classifier marker removed.
    ///
    /// This is the key the client registers subscriptions under, so
    /// subscribing with and without a classifier yields the same entry.
    pub fn normalized(&self) -> String {
        match self.classifier_span() {
            Some((start, end, _)) => {
                let mut key = String::with_capacity(self.0.len() - (end - start));
                key.push_str(&self.0[..start]);
                key.push_str(&self.0[end..]);
                key
            }
            None => self.0.clone(),
        }
    }

    fn classifier_span(&self) -> Option<(usize, usize, Classifier)> {
        Classifier::ALL
            .iter()
            .filter_map(|classifier| {
                let marker = classifier.marker();
                self.0
                    .find(marker)
                    .map(|start| (start, start + marker.len(), *classifier))
            })
            .min_by_key(|(start, _, _)| *start)
    }
}

impl fmt::Display for StreamUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamUrn {
    fn from(urn: String) -> Self {
        Self(urn)
    }
}

impl From<&str> for StreamUrn {
    fn from(urn: &str) -> Self {
        Self(urn.to_string())
    }
}

/// Opaque credential forwarded as `lfToken` on every subscribe and rewind.
///
/// The client never inspects the token. Any JSON value is accepted.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(Value);

impl Credential {
    pub fn new(token: impl Into<Value>) -> Self {
        Self(token.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(Value::String(token.to_string()))
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(Value::String(token))
    }
}

impl From<Value> for Credential {
    fn from(token: Value) -> Self {
        Self(token)
    }
}

/// Server-assigned event identifier, used as the `resumeTime` half of a
/// resume point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Value);

impl EventId {
    pub fn new(id: impl Into<Value>) -> Self {
        Self(id.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        Self(Value::from(id))
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(Value::String(id))
    }
}

/// Resume point reported for one stream in a subscribe or rewind request.
///
/// Unknown fields are sent as explicit `null`s; the server treats a null
/// position as "start from live".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPosition {
    pub stream_id: String,
    #[serde(default)]
    pub resume_time: Option<EventId>,
    #[serde(default)]
    pub resume_seq: Option<u64>,
}

impl StreamPosition {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            resume_time: None,
            resume_seq: None,
        }
    }

    pub fn at(stream_id: impl Into<String>, resume_seq: Option<u64>, resume_time: Option<EventId>) -> Self {
        Self {
            stream_id: stream_id.into(),
            resume_time,
            resume_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("urn:livefyre:cnn.fyre.co:user=user4996:personalStream", "urn:livefyre:cnn.fyre.co:user=user4996")]
    #[case("urn:livefyre:cnn.fyre.co:topic=news:topicStream", "urn:livefyre:cnn.fyre.co:topic=news")]
    #[case("urn:livefyre:cnn.fyre.co:site=1:collectionStream", "urn:livefyre:cnn.fyre.co:site=1")]
    #[case("urn:livefyre:cnn.fyre.co:user=user4996", "urn:livefyre:cnn.fyre.co:user=user4996")]
    fn test_normalized_strips_classifier(#[case] urn: &str, #[case] expected: &str) {
        assert_eq!(StreamUrn::from(urn).normalized(), expected);
    }

    #[test]
    fn test_normalized_strips_only_first_marker() {
        let urn = StreamUrn::from("urn:a:topicStream:b:personalStream");
        assert_eq!(urn.normalized(), "urn:a:b:personalStream");
        assert_eq!(urn.classifier(), Some(Classifier::TopicStream));
    }

    #[test]
    fn test_classifier_absent() {
        assert_eq!(StreamUrn::from("urn:a:user=1").classifier(), None);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::from("someBase64EncodedToken");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
        assert_eq!(
            serde_json::to_value(&credential).unwrap(),
            json!("someBase64EncodedToken")
        );
    }

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId::from("abc").to_string(), "abc");
        assert_eq!(EventId::from(1_234_u64).to_string(), "1234");
    }

    #[test]
    fn test_position_serializes_nulls() {
        let position = StreamPosition::new("urn:a");
        assert_eq!(
            serde_json::to_value(&position).unwrap(),
            json!({"streamId": "urn:a", "resumeTime": null, "resumeSeq": null})
        );

        let position = StreamPosition::at("urn:a", Some(7), Some(EventId::from(99_u64)));
        assert_eq!(
            serde_json::to_value(&position).unwrap(),
            json!({"streamId": "urn:a", "resumeTime": 99, "resumeSeq": 7})
        );
    }
}
