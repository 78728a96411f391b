//! JSON encoding of protocol messages

use crate::error::MessageError;
use crate::topics::{route, Route};
use crate::types::{Inbound, StateSync, Submission, Summary, TeamReset};
use serde::Serialize;

/// Serialize an outbound message to JSON bytes
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

/// Decode a payload according to the topic it arrived on
pub fn decode(topic: &str, payload: &[u8]) -> Result<Inbound, MessageError> {
    let route = route(topic).ok_or_else(|| MessageError::UnroutedTopic(topic.to_string()))?;

    match route {
        Route::Presence => Ok(Inbound::Presence(serde_json::from_slice(payload)?)),
        Route::Summary => Ok(Inbound::Summary(serde_json::from_slice::<Summary>(payload)?)),
        Route::Scores => {
            // Scores topics carry either a tagged state sync or a bare submission
            let value: serde_json::Value = serde_json::from_slice(payload)?;
            if value.get("type").and_then(|t| t.as_str()) == Some("state_sync") {
                Ok(Inbound::StateSync(serde_json::from_value::<StateSync>(value)?))
            } else {
                Ok(Inbound::Submission(serde_json::from_value::<Submission>(value)?))
            }
        }
        Route::Reset => {
            let reset: TeamReset = serde_json::from_slice(payload)?;
            if !reset.is_clear_scores() {
                return Err(MessageError::UnsupportedReset {
                    kind: reset.kind,
                    action: reset.action,
                });
            }
            Ok(Inbound::Reset(reset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StudentId;

    #[test]
    fn test_decode_bare_submission() {
        let payload = br#"{"studentId":"s9","clarity":4,"delivery":5,"confidence":6,"isAnonymous":true,"timestamp":"2024-01-01T00:00:00Z"}"#;
        match decode("scores/broadcast", payload).unwrap() {
            Inbound::Submission(sub) => {
                assert_eq!(sub.student_id, StudentId::from("s9"));
                assert!(sub.is_anonymous);
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_state_sync() {
        let payload = br#"{"type":"state_sync","source":"peer_a","scores":[[1,{"studentId":1,"clarity":8,"delivery":7,"confidence":9,"timestamp":"2024-01-01T00:00:00Z"}]]}"#;
        match decode("scores/peer_b", payload).unwrap() {
            Inbound::StateSync(sync) => {
                assert_eq!(sync.source, "peer_a");
                assert_eq!(sync.scores.len(), 1);
                assert_eq!(sync.scores[0].0, StudentId::Number(1));
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_wrong_tag_is_not_state_sync() {
        // Anything not tagged state_sync is read as a bare submission
        let payload = br#"{"type":"other","source":"peer_a","scores":[]}"#;
        assert!(matches!(decode("scores/x", payload), Err(MessageError::Json(_))));
    }

    #[test]
    fn test_decode_presence_from_other_tool() {
        let payload = br#"{"peerId":"tool_1","type":"presentation_tool"}"#;
        match decode("system/presentation_tool", payload).unwrap() {
            Inbound::Presence(p) => {
                assert_eq!(p.peer_id, "tool_1");
                assert!(p.timestamp.is_none());
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_reset_action() {
        let payload = br#"{"type":"team_reset","action":"shuffle","teamName":"A"}"#;
        assert!(matches!(
            decode("team_reset", payload),
            Err(MessageError::UnsupportedReset { .. })
        ));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("summary/x", b"{not json"), Err(MessageError::Json(_))));
        assert!(matches!(decode("scores/x", b"{}"), Err(MessageError::Json(_))));
        assert!(matches!(decode("other", b"{}"), Err(MessageError::UnroutedTopic(_))));
    }
}
