//! Canonical sign-bytes layout.
//!
//! The host encodes every vote and proposal into a fixed-layout byte
//! string before asking for a signature:
//!
//! ```text
//! offset  0        step        u8
//! offset  1..9     height      i64 LE
//! offset  9..17    round       i64 LE
//! offset 17..25    timestamp   i64 LE (unix nanoseconds)
//! offset 25..27    chain id length  u16 LE
//! offset 27..27+L  chain id    utf-8
//! offset 27+L..    payload     opaque (block id hash etc.)
//! ```
//!
//! The timestamp field sits at a fixed offset so that two encodings of
//! the same vote at different times can be recognized: they must agree
//! on every byte outside `17..25`.

use crate::error::CosignError;
use crate::hrs::{HrsKey, Step};

/// Byte range of the timestamp field.
pub const TIMESTAMP_RANGE: std::ops::Range<usize> = 17..25;

/// Minimum length of a well-formed encoding (empty chain id, no payload).
pub const MIN_LEN: usize = 27;

/// Parsed header of a canonical sign-bytes string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    pub key: HrsKey,
    pub chain_id: String,
    pub timestamp_ns: i64,
}

/// Encode a vote or proposal into canonical sign bytes.
pub fn encode(
    chain_id: &str,
    step: Step,
    height: i64,
    round: i64,
    timestamp_ns: i64,
    payload: &[u8],
) -> Vec<u8> {
    let chain = chain_id.as_bytes();
    let mut out = Vec::with_capacity(MIN_LEN + chain.len() + payload.len());
    out.push(step as u8);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&round.to_le_bytes());
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out.extend_from_slice(&(chain.len() as u16).to_le_bytes());
    out.extend_from_slice(chain);
    out.extend_from_slice(payload);
    out
}

/// Parse the header of canonical sign bytes.
pub fn parse(bytes: &[u8]) -> Result<SignedData, CosignError> {
    if bytes.len() < MIN_LEN {
        return Err(CosignError::MalformedSignBytes(format!(
            "too short: {} bytes",
            bytes.len()
        )));
    }
    let step = Step::from_i8(bytes[0] as i8).ok_or_else(|| {
        CosignError::MalformedSignBytes(format!("invalid step {}", bytes[0]))
    })?;
    let height = i64::from_le_bytes(bytes[1..9].try_into().expect("checked length"));
    let round = i64::from_le_bytes(bytes[9..17].try_into().expect("checked length"));
    let timestamp_ns = i64::from_le_bytes(bytes[17..25].try_into().expect("checked length"));
    let chain_len = u16::from_le_bytes(bytes[25..27].try_into().expect("checked length")) as usize;
    if bytes.len() < MIN_LEN + chain_len {
        return Err(CosignError::MalformedSignBytes(
            "chain id extends past end of buffer".to_string(),
        ));
    }
    let chain_id = std::str::from_utf8(&bytes[27..27 + chain_len])
        .map_err(|e| CosignError::MalformedSignBytes(format!("chain id not utf-8: {e}")))?
        .to_string();

    Ok(SignedData {
        key: HrsKey::new(height, round, step),
        chain_id,
        timestamp_ns,
    })
}

/// Read the raw timestamp field without validating the rest.
pub fn timestamp_ns(bytes: &[u8]) -> Option<i64> {
    let field = bytes.get(TIMESTAMP_RANGE)?;
    Some(i64::from_le_bytes(field.try_into().ok()?))
}

/// Compare two encodings treating the timestamp field as a wildcard.
///
/// Returns the timestamp previously signed (from `stored`) when the
/// candidate agrees with `stored` on every byte outside the timestamp
/// field. Any structural difference, including a length change,
/// rejects the candidate.
pub fn only_differ_by_timestamp(stored: &[u8], candidate: &[u8]) -> Option<i64> {
    if stored.len() != candidate.len() || stored.len() < MIN_LEN {
        return None;
    }
    let same_outside_timestamp = stored
        .iter()
        .zip(candidate.iter())
        .enumerate()
        .all(|(i, (a, b))| TIMESTAMP_RANGE.contains(&i) || a == b);
    if same_outside_timestamp {
        timestamp_ns(stored)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ns: i64) -> Vec<u8> {
        encode("test-chain", Step::Prevote, 10, 0, timestamp_ns, &[0xAB; 32])
    }

    #[test]
    fn test_encode_parse_round_trip() {
        let bytes = sample(1_700_000_000_000_000_000);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.key, HrsKey::new(10, 0, Step::Prevote));
        assert_eq!(parsed.chain_id, "test-chain");
        assert_eq!(parsed.timestamp_ns, 1_700_000_000_000_000_000);
    }

    #[test]
    fn test_parse_rejects_bad_step() {
        let mut bytes = sample(1);
        bytes[0] = 7;
        assert!(matches!(
            parse(&bytes),
            Err(CosignError::MalformedSignBytes(_))
        ));
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_timestamp_wildcard_accepts_timestamp_change() {
        let a = sample(1_000);
        let b = sample(2_000);
        assert_eq!(only_differ_by_timestamp(&a, &b), Some(1_000));
    }

    #[test]
    fn test_timestamp_wildcard_rejects_other_changes() {
        let a = sample(1_000);

        // Different payload byte.
        let mut b = sample(1_000);
        *b.last_mut().unwrap() ^= 1;
        assert_eq!(only_differ_by_timestamp(&a, &b), None);

        // Different height.
        let c = encode("test-chain", Step::Prevote, 11, 0, 1_000, &[0xAB; 32]);
        assert_eq!(only_differ_by_timestamp(&a, &c), None);

        // Different length.
        let d = encode("test-chain", Step::Prevote, 10, 0, 1_000, &[0xAB; 33]);
        assert_eq!(only_differ_by_timestamp(&a, &d), None);

        // Empty stored state never matches.
        assert_eq!(only_differ_by_timestamp(&[], &a), None);
    }
}
