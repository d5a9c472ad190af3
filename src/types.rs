//! Request and reply types of the cosigner RPC and the DKG bus.
//!
//! The cosigner wire protocol is a closed set of three round shapes;
//! it travels as an internally-tagged JSON enum so unknown tags are
//! rejected at the parse step. All byte fields are hex-encoded;
//! protocol messages are ordered frame lists.

use serde::{Deserialize, Serialize};

/// A cosigner RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "round", rename_all = "snake_case")]
pub enum CosignRequest {
    /// Round 0: open a session for the quorum.
    StartSession {
        party_id: u8,
        sign_bytes: String,
        party_ids: String,
    },
    /// Round 1: exchange the aggregated round-1 messages.
    EndSession {
        party_id: u8,
        sign_bytes: String,
        party_ids: String,
        msg1_out: Vec<String>,
    },
    /// Final signature propagation.
    SetSignature {
        party_id: u8,
        sign_bytes: String,
        sig: String,
    },
}

/// A cosigner RPC reply. Every received request produces exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CosignReply {
    /// Raw outgoing protocol frames (rounds 0 and 1).
    Messages { frames: Vec<String> },
    /// Definitive final signature from a cosigner that already
    /// completed this height/round/step.
    Signature { sig: String },
    /// The request failed; the message is reported verbatim.
    Error { message: String },
    /// SetSignature acknowledgement.
    Ok,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub cosigner_id: u8,
}

/// Publish one multi-frame message onto the DKG bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusPublishRequest {
    /// Hex-encoded frames; frame 0 is the 3-byte
    /// `(source_id: u16 LE, round: u8)` header.
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusPublishResponse {
    pub seq: u64,
}

/// Messages published on the bus since a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusPollResponse {
    pub messages: Vec<Vec<String>>,
    pub next_cursor: u64,
}

pub fn encode_frames(frames: &[Vec<u8>]) -> Vec<String> {
    frames.iter().map(hex::encode).collect()
}

pub fn decode_frames(frames: &[String]) -> Result<Vec<Vec<u8>>, hex::FromHexError> {
    frames.iter().map(|f| hex::decode(f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = CosignRequest::EndSession {
            party_id: 3,
            sign_bytes: "aa".repeat(30),
            party_ids: "010203".to_string(),
            msg1_out: vec!["01ff".to_string(), "02ee".to_string()],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"round\":\"end_session\""));
        let parsed: CosignRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            CosignRequest::EndSession { party_id, msg1_out, .. } => {
                assert_eq!(party_id, 3);
                assert_eq!(msg1_out.len(), 2);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_round_tag_is_rejected() {
        let result: Result<CosignRequest, _> =
            serde_json::from_str(r#"{"round":"round_three","party_id":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let ok = serde_json::to_string(&CosignReply::Ok).unwrap();
        assert_eq!(ok, r#"{"status":"ok"}"#);

        let sig = serde_json::to_string(&CosignReply::Signature {
            sig: "ab".repeat(64),
        })
        .unwrap();
        let parsed: CosignReply = serde_json::from_str(&sig).unwrap();
        assert!(matches!(parsed, CosignReply::Signature { .. }));
    }

    #[test]
    fn test_frame_helpers_round_trip() {
        let frames = vec![vec![1u8, 2, 3], vec![0xff, 0x00]];
        let encoded = encode_frames(&frames);
        assert_eq!(decode_frames(&encoded).unwrap(), frames);
        assert!(decode_frames(&["zz".to_string()]).is_err());
    }
}
