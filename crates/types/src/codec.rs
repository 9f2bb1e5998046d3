//! Defines the canonical, deterministic binary codec for all consensus-critical data.
//!
//! This module provides thin wrappers around `parity-scale-codec` (SCALE),
//! chosen for its compact and deterministic properties. By centralizing the
//! codec logic here in the base `types` crate, every component uses the exact
//! same serialization format for hash preimages, wire payloads, and stored
//! records, preventing consensus failures due to different binary
//! representations of the same data. JSON survives only at external
//! boundaries (the genesis file and the self-describing handshake payloads).

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
///
/// This function must be used for all data that is hashed, signed, stored in
/// consensus-critical state, or sent as a binary wire payload.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from its canonical byte representation.
///
/// Fails fast on any decoding error, including trailing bytes. This is
/// critical for preventing malformed data from being processed in a
/// consensus context.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Encode, Decode, Debug, PartialEq, Eq)]
    struct Sample {
        id: u32,
        tag: Vec<u8>,
    }

    #[test]
    fn roundtrip_is_lossless() {
        let original = Sample {
            id: 7,
            tag: vec![1, 2, 3],
        };
        let bytes = to_bytes_canonical(&original);
        let decoded = from_bytes_canonical::<Sample>(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut bytes = to_bytes_canonical(&Sample {
            id: 9,
            tag: vec![4, 5, 6, 7],
        });
        bytes.pop();
        let err = from_bytes_canonical::<Sample>(&bytes).unwrap_err();
        assert!(err.contains("canonical decode failed"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = to_bytes_canonical(&Sample {
            id: 1,
            tag: vec![],
        });
        bytes.push(0xff);
        assert!(from_bytes_canonical::<Sample>(&bytes).is_err());
    }
}
