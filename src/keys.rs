//! Deterministic key construction.
//!
//! Every record lives at an address derived from a parent address and a fixed
//! byte tag, so any party can recompute a lookup key without a directory:
//!
//! ```text
//! derive(parent, tag) = blake3(parent || tag)[12..32]
//! operator(pk)        = blake3(pk)[12..32]
//! ```
//!
//! Heights and indices are appended big-endian. Module accounts are reserved
//! addresses `0x00..00NN`. External tooling depends on these exact rules.

use crate::types::{Address, PublicKey};

pub const BONDED_POOL: Address = Address::reserved(0x01);
pub const UNBONDED_POOL: Address = Address::reserved(0x02);
pub const UNBONDING_SET: Address = Address::reserved(0x03);
pub const POWER_INDEX: Address = Address::reserved(0x04);
pub const BONDED_SET: Address = Address::reserved(0x05);
/// Per-block rewards (fees/inflation) awaiting allocation.
pub const REWARD_ALLOCATION_POOL: Address = Address::reserved(0x06);
pub const COMMUNITY_POOL: Address = Address::reserved(0x07);
pub const EVIDENCE_QUEUE: Address = Address::reserved(0x08);

/// `blake3(parent || tag)`, last 20 bytes.
pub fn derive(parent: &Address, tag: &[u8]) -> Address {
    let mut buf = Vec::with_capacity(parent.as_bytes().len() + tag.len());
    buf.extend_from_slice(parent.as_bytes());
    buf.extend_from_slice(tag);
    Address::from_digest(&buf)
}

fn derive_with(parent: &Address, tag: &[u8], parts: &[&[u8]]) -> Address {
    let mut full = tag.to_vec();
    for p in parts {
        full.extend_from_slice(p);
    }
    derive(parent, &full)
}

pub fn operator_address(public_key: &PublicKey) -> Address {
    Address::from_digest(public_key.as_bytes())
}

pub fn validator_address(operator: &Address) -> Address {
    derive(operator, b"ValidatorAddress")
}

pub fn delegation_address(delegator: &Address, validator: &Address) -> Address {
    derive_with(delegator, b"Delegation", &[validator.as_bytes()])
}

pub fn undelegation_address(delegator: &Address, validator: &Address) -> Address {
    derive_with(delegator, b"Undelegation", &[validator.as_bytes()])
}

pub fn redelegation_address(delegator: &Address, src: &Address, dst: &Address) -> Address {
    derive_with(delegator, b"Redelegation", &[src.as_bytes(), dst.as_bytes()])
}

pub fn signing_info_address(validator: &Address) -> Address {
    derive(validator, b"SigningInfo")
}

pub fn missed_blocks_chunk_address(validator: &Address, chunk: u64) -> Address {
    derive_with(validator, b"MissedBlocks", &[&chunk.to_be_bytes()])
}

/// Work-in-progress lump-sum record (sentinel key).
pub fn current_rewards_record_address(validator: &Address) -> Address {
    derive(validator, b"LumpSumRewardsRecordCurrent")
}

/// Closed lump-sum record keyed by its start height.
pub fn rewards_record_address(validator: &Address, start_height: i64) -> Address {
    derive_with(validator, b"LumpSumRewardsRecord", &[&start_height.to_be_bytes()])
}

/// Receives the delegators' portion from the allocator until collected.
pub fn reward_pool_address(validator: &Address) -> Address {
    derive(validator, b"RewardPool")
}

/// Holds collected rewards that delegators claim from.
pub fn reward_vault_address(validator: &Address) -> Address {
    derive(validator, b"RewardVault")
}

/// Commission and proposer rewards of an operator.
pub fn operator_reward_address(operator: &Address) -> Address {
    derive(operator, b"OperatorReward")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_tag_separated() {
        let a = Address::new([7u8; 20]);
        let b = Address::new([8u8; 20]);
        assert_eq!(delegation_address(&a, &b), delegation_address(&a, &b));
        assert_ne!(delegation_address(&a, &b), undelegation_address(&a, &b));
        assert_ne!(delegation_address(&a, &b), delegation_address(&b, &a));
        assert_ne!(redelegation_address(&a, &a, &b), redelegation_address(&a, &b, &a));
    }

    #[test]
    fn record_heights_map_to_distinct_keys() {
        let v = validator_address(&Address::new([1u8; 20]));
        assert_ne!(rewards_record_address(&v, 10), rewards_record_address(&v, 11));
        assert_ne!(rewards_record_address(&v, 0), current_rewards_record_address(&v));
        assert_ne!(missed_blocks_chunk_address(&v, 0), missed_blocks_chunk_address(&v, 1));
    }

    #[test]
    fn operator_matches_public_key() {
        let pk = PublicKey::new([3u8; 33]);
        assert_eq!(pk.address(), operator_address(&pk));
        assert_ne!(operator_address(&pk), operator_address(&PublicKey::new([4u8; 33])));
    }
}
