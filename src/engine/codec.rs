//! On-disk envelope for the state-vector cache row.

use serde::{Deserialize, Serialize};

use crate::types::Seq;

/// Version number for serialized [`SvCacheEnvelope`] payloads.
pub const SV_FORMAT_VERSION: u16 = 1;

/// Payload of a snapshot-vector row: the encoded state vector plus the
/// clock (update sequence) at which it was captured.
///
/// The cache is only trustworthy while `clock` equals the document's
/// latest update sequence; the engine re-derives it otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvCacheEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Update sequence the vector was captured at.
    pub clock: Seq,
    /// Encoded CRDT state vector.
    pub sv: Vec<u8>,
}

/// Encodes a cache payload at [`SV_FORMAT_VERSION`].
pub fn encode_sv_cache(clock: Seq, sv: &[u8]) -> Result<Vec<u8>, String> {
    let env = SvCacheEnvelope {
        format_version: SV_FORMAT_VERSION,
        clock,
        sv: sv.to_vec(),
    };
    serde_json::to_vec(&env).map_err(|e| format!("sv cache encode failed: {e}"))
}

/// Decodes a cache payload, returning `(clock, state_vector)`.
pub fn decode_sv_cache(payload: &[u8]) -> Result<(Seq, Vec<u8>), String> {
    let env: SvCacheEnvelope =
        serde_json::from_slice(payload).map_err(|e| format!("sv cache decode failed: {e}"))?;
    if env.format_version != SV_FORMAT_VERSION {
        return Err(format!(
            "unsupported sv cache format version: {}",
            env.format_version
        ));
    }
    Ok((env.clock, env.sv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let payload = encode_sv_cache(42, &[1, 2, 3]).expect("encode");
        let (clock, sv) = decode_sv_cache(&payload).expect("decode");
        assert_eq!(clock, 42);
        assert_eq!(sv, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_format_version_rejected() {
        let env = SvCacheEnvelope {
            format_version: 99,
            clock: 0,
            sv: vec![],
        };
        let payload = serde_json::to_vec(&env).expect("encode");
        assert!(decode_sv_cache(&payload).is_err());
    }

    #[test]
    fn garbage_payload_rejected() {
        assert!(decode_sv_cache(b"not json").is_err());
    }
}
