//! SHA-256 hashing and the canonical preimage used for entry hashes and signatures.

use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fields joined with `|` in the order fixed by the wire spec. This is the
/// only preimage used for `entry_hash` and for signatures — any change here
/// is a wire-format break.
#[allow(clippy::too_many_arguments)]
pub fn canonical_preimage(
    entry_id: &str,
    sequence_number: i64,
    transaction_id: &str,
    sender_id: &str,
    receiver_id: &str,
    amount: i64,
    fee: i64,
    coin_type_id: &str,
    input_utxo_hash: Option<&str>,
    pow_nonce: &str,
    lamport_counter: u64,
    lamport_node_id: &str,
    seq_nonce: &str,
) -> Vec<u8> {
    let parts = [
        entry_id,
        &sequence_number.to_string(),
        transaction_id,
        sender_id,
        receiver_id,
        &amount.to_string(),
        &fee.to_string(),
        coin_type_id,
        input_utxo_hash.unwrap_or(""),
        pow_nonce,
        &lamport_counter.to_string(),
        lamport_node_id,
        seq_nonce,
    ];
    parts.join("|").into_bytes()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_is_pipe_delimited_in_fixed_order() {
        let p = canonical_preimage(
            "id", 1, "tx", "sender", "receiver", 100, 1, "coin", None, "nonce", 7, "node", "sn",
        );
        assert_eq!(
            String::from_utf8(p).unwrap(),
            "id|1|tx|sender|receiver|100|1|coin||nonce|7|node|sn"
        );
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), sha256(b"abd"));
    }
}
