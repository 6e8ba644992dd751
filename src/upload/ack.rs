//! Fragment-ACK event parsing: the `PUT_MEDIA` response body is a stream of
//! newline-adjacent JSON objects, each conveying buffering/receipt/
//! persistence status for one fragment. `json_helper.c`'s dotted-path
//! extraction is replaced here by typed `serde_json` deserialization.

use serde::Deserialize;

use super::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FragmentEventType {
    #[serde(rename = "BUFFERING")]
    Buffering,
    #[serde(rename = "RECEIVED")]
    Received,
    #[serde(rename = "PERSISTED")]
    Persisted,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "IDLE")]
    Idle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentAckEvent {
    #[serde(rename = "EventType")]
    pub event_type: FragmentEventType,
    #[serde(rename = "FragmentTimecode", default)]
    pub fragment_timecode: Option<u64>,
    #[serde(rename = "ErrorId", default)]
    pub error_id: Option<String>,
}

/// Parses every complete JSON object found in `body` into a
/// [`FragmentAckEvent`]. KVS emits these back-to-back with no separator, so
/// a streaming deserializer (rather than a line-split) is required.
pub fn parse_fragment_acks(body: &[u8]) -> Result<Vec<FragmentAckEvent>, UploadError> {
    let stream = serde_json::Deserializer::from_slice(body).into_iter::<FragmentAckEvent>();
    let mut events = Vec::new();
    for event in stream {
        events.push(event?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_back_to_back_events() {
        let body = br#"{"EventType":"BUFFERING","FragmentTimecode":0}{"EventType":"PERSISTED","FragmentTimecode":1000}"#;
        let events = parse_fragment_acks(body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, FragmentEventType::Buffering);
        assert_eq!(events[1].event_type, FragmentEventType::Persisted);
        assert_eq!(events[1].fragment_timecode, Some(1000));
    }

    #[test]
    fn error_event_carries_error_id() {
        let body = br#"{"EventType":"ERROR","FragmentTimecode":500,"ErrorId":"STREAM_NOT_FOUND"}"#;
        let events = parse_fragment_acks(body).unwrap();
        assert_eq!(events[0].event_type, FragmentEventType::Error);
        assert_eq!(events[0].error_id.as_deref(), Some("STREAM_NOT_FOUND"));
    }
}
