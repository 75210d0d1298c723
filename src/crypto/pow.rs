//! Proof-of-work anti-spam: a nonce making `SHA-256(sender_id | entry_id | lamport_counter | nonce)`
//! satisfy a leading-zero-bit target. Anti-spam only — no mining economy, no
//! adaptive difficulty (see §9 open-question resolution).

use crate::crypto::hash::sha256;

fn pow_preimage(sender_id: &str, entry_id: &str, lamport_counter: u64, nonce: &str) -> Vec<u8> {
    format!("{sender_id}|{entry_id}|{lamport_counter}|{nonce}").into_bytes()
}

fn leading_zero_bits(digest: &[u8; 32]) -> u32 {
    let mut bits = 0u32;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
            continue;
        }
        bits += byte.leading_zeros();
        break;
    }
    bits
}

/// Recomputes the digest and compares its leading zero bits against `difficulty`.
/// Cheap: this is the "verify" half of the cheap-to-verify/costly-to-produce pair.
pub fn verify(sender_id: &str, entry_id: &str, lamport_counter: u64, nonce: &str, difficulty: u32) -> bool {
    let digest = sha256(&pow_preimage(sender_id, entry_id, lamport_counter, nonce));
    leading_zero_bits(&digest) >= difficulty
}

/// Brute-force search for a nonce satisfying `difficulty`. Used by build-and-submit
/// (local origination only — a node never mines on behalf of a peer).
pub fn mine(sender_id: &str, entry_id: &str, lamport_counter: u64, difficulty: u32) -> String {
    let mut counter: u64 = 0;
    loop {
        let nonce = counter.to_string();
        if verify(sender_id, entry_id, lamport_counter, &nonce, difficulty) {
            return nonce;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mined_nonce_verifies_at_its_difficulty() {
        let nonce = mine("sender", "entry", 1, 8);
        assert!(verify("sender", "entry", 1, &nonce, 8));
    }

    #[test]
    fn zero_difficulty_always_verifies() {
        assert!(verify("sender", "entry", 1, "anything", 0));
    }

    #[test]
    fn leading_zero_bits_counts_across_byte_boundary() {
        let digest = [0x00u8, 0x0Fu8, 0xFFu8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(leading_zero_bits(&digest), 12);
    }
}
