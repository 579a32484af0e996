//! Hex test vectors for the wire formats.
//!
//! Each vector pairs an input with the bytes it must encode to, or with the
//! reason decoding must fail. The whole set serializes to JSON so other
//! implementations can check themselves against it.

use serde::{Deserialize, Serialize};

/// A test vector that can be shared across implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input data (hex-encoded).
    pub input_hex: String,
    /// Expected re-encoding (hex-encoded).
    pub expected_hex: String,
    /// Why decoding must fail, if it must.
    pub expected_error: Option<String>,
}

impl TestVector {
    fn ok(id: &str, description: &str, hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: hex.into(),
            expected_hex: hex.into(),
            expected_error: None,
        }
    }

    fn err(id: &str, description: &str, hex: &str, error: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: hex.into(),
            expected_hex: String::new(),
            expected_error: Some(error.into()),
        }
    }
}

/// GUID of replica `01010101-...` as used by the vectors.
pub const VECTOR_REPLICA_HEX: &str = "01010101010101010101010101010101";

fn replica_prefixed(rest: &str) -> String {
    format!("{VECTOR_REPLICA_HEX}{rest}")
}

/// IDSET encoding vectors (GUID followed by a GLOBSET).
pub fn idset_vectors() -> Vec<TestVector> {
    vec![
        TestVector::ok("idset_empty", "IDSET with no replicas", ""),
        TestVector::ok(
            "idset_single",
            "One counter: a six-byte push names it",
            &replica_prefixed("0600000000000100"),
        ),
        TestVector::ok(
            "idset_range",
            "Counters 1..=5: five-byte push, range over the last byte, pop",
            &replica_prefixed("0500000000005201055000"),
        ),
        TestVector::err(
            "idset_truncated_push",
            "Push announces six bytes but only two follow",
            &replica_prefixed("060000"),
            "truncated",
        ),
        TestVector::err(
            "idset_missing_end",
            "GLOBSET without its end command",
            &replica_prefixed("06000000000001"),
            "truncated",
        ),
    ]
}

/// Predecessor change list vectors.
pub fn pcl_vectors() -> Vec<TestVector> {
    vec![
        TestVector::ok(
            "pcl_single",
            "Total length 23, one size-prefixed XID: replica 01.., counter 5",
            &format!("170016{VECTOR_REPLICA_HEX}000000000005"),
        ),
        TestVector::ok(
            "pcl_two_replicas",
            "Total length 46, two XIDs on different replicas, order kept",
            &format!(
                "2e0016{VECTOR_REPLICA_HEX}000000000005\
                 1602020202020202020202020202020202000000000001"
            ),
        ),
        TestVector::err(
            "pcl_too_short",
            "Three bytes cannot hold an entry",
            "0300160102",
            "invalid pcl",
        ),
        TestVector::err(
            "pcl_length_mismatch",
            "Total length 24 over a 23-byte entry",
            &format!("180016{VECTOR_REPLICA_HEX}000000000005"),
            "invalid pcl",
        ),
    ]
}

/// Short-term id layout vectors.
pub fn short_term_id_vectors() -> Vec<TestVector> {
    vec![
        TestVector::ok(
            "short_term_id_inbox",
            "Replica index 1 (little-endian), counter 0x42 (big-endian)",
            "0100000000000042",
        ),
        TestVector::ok(
            "short_term_id_max_counter",
            "Replica index 0xFFFF, counter 2^48-1",
            "ffffffffffffffff",
        ),
    ]
}

/// FastTransfer stream vectors.
pub fn stream_vectors() -> Vec<TestVector> {
    vec![
        TestVector::ok(
            "stream_top_folder_a",
            "Top folder with display name \"A\"",
            "030009401f00013004004100000003000b40",
        ),
        TestVector::ok(
            "stream_empty_state",
            "Checkpoint state with no properties",
            "03003a4003003b40",
        ),
        TestVector::err(
            "stream_unknown_marker",
            "A value that is neither a marker nor a property tag",
            "0300094099003412",
            "unknown marker",
        ),
    ]
}

/// Serializes every vector to pretty JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        idset: idset_vectors(),
        pcl: pcl_vectors(),
        short_term_id: short_term_id_vectors(),
        stream: stream_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    idset: Vec<TestVector>,
    pcl: Vec<TestVector>,
    short_term_id: Vec<TestVector>,
    stream: Vec<TestVector>,
}

/// Encodes bytes as hexadecimal string.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decodes hexadecimal string to bytes.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    let hex = hex.replace([' ', '\n', '\r'], "");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("Invalid hex"))
        .collect()
}
