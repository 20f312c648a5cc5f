//! Учёт подписей и downtime.
//!
//! Пропущенные блоки хранятся кольцевым битовым окном длиной
//! `signed_blocks_window`, разбитым на чанки по `MISSED_BLOCKS_CHUNK_BITS` бит.
//! Отсутствующий чанк читается как нули.

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, info};

use super::slashing::SlashReason;
use super::validator::BondingStatus;
use super::{BlockContext, StakingEngine, VoteFlag};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, PublicKey};

pub const MISSED_BLOCKS_CHUNK_BITS: i64 = 1024;
const CHUNK_BYTES: usize = (MISSED_BLOCKS_CHUNK_BITS / 8) as usize;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSigningInfo {
    pub address: Address,
    pub start_height: i64,
    pub index_offset: i64,
    pub missed_blocks_counter: i64,
    pub jailed_until: i64,
    pub tombstoned: bool,
}

impl ValidatorSigningInfo {
    pub fn new(address: Address, start_height: i64) -> Self {
        Self {
            address,
            start_height,
            index_offset: 0,
            missed_blocks_counter: 0,
            jailed_until: 0,
            tombstoned: false,
        }
    }
}

fn chunk_of(index: i64) -> (u64, usize, u8) {
    let chunk = (index / MISSED_BLOCKS_CHUNK_BITS) as u64;
    let bit = (index % MISSED_BLOCKS_CHUNK_BITS) as usize;
    (chunk, bit / 8, 1u8 << (bit % 8))
}

fn load_chunk<S: StateStore + ?Sized>(store: &S, validator: &Address, chunk: u64) -> Result<Vec<u8>> {
    match store.get_state(&keys::missed_blocks_chunk_address(validator, chunk)) {
        None => Ok(vec![0; CHUNK_BYTES]),
        Some(bytes) if bytes.len() == CHUNK_BYTES => Ok(bytes),
        Some(bytes) => Err(StakingError::Codec(format!(
            "missed blocks chunk {chunk} of {validator} has {} bytes",
            bytes.len()
        ))),
    }
}

/// Whether the block at window position `index` was missed.
pub fn missed_block_bit<S: StateStore + ?Sized>(store: &S, validator: &Address, index: i64) -> Result<bool> {
    let (chunk, byte, mask) = chunk_of(index);
    Ok(load_chunk(store, validator, chunk)?[byte] & mask != 0)
}

fn set_missed_block_bit<S: StateStore + ?Sized>(store: &mut S, validator: &Address, index: i64, missed: bool) -> Result<()> {
    let (chunk, byte, mask) = chunk_of(index);
    let mut bytes = load_chunk(store, validator, chunk)?;
    if missed {
        bytes[byte] |= mask;
    } else {
        bytes[byte] &= !mask;
    }
    let address = keys::missed_blocks_chunk_address(validator, chunk);
    if bytes.iter().all(|b| *b == 0) {
        store.remove_state(&address);
    } else {
        store.set_state(address, bytes);
    }
    Ok(())
}

fn clear_missed_blocks<S: StateStore + ?Sized>(store: &mut S, validator: &Address, window: i64) {
    let chunks = (window + MISSED_BLOCKS_CHUNK_BITS - 1) / MISSED_BLOCKS_CHUNK_BITS;
    for chunk in 0..chunks as u64 {
        store.remove_state(&keys::missed_blocks_chunk_address(validator, chunk));
    }
}

impl StakingEngine {
    /// Record one vote of `public_key` and slash for downtime when the window
    /// shows too many misses.
    pub fn handle_validator_signature<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        public_key: &PublicKey,
        power: u128,
        signed: bool,
    ) -> Result<()> {
        let validator = keys::validator_address(&public_key.address());
        let mut info = store
            .signing_info(&validator)?
            .ok_or_else(|| StakingError::not_found("signing info", validator))?;
        if info.tombstoned {
            return Ok(());
        }

        let window = self.params.signed_blocks_window;
        let index = info.index_offset % window;
        info.index_offset += 1;

        let missed = !signed;
        let previous = missed_block_bit(&*store, &validator, index)?;
        match (previous, missed) {
            (false, true) => {
                set_missed_block_bit(store, &validator, index, true)?;
                info.missed_blocks_counter += 1;
            }
            (true, false) => {
                set_missed_block_bit(store, &validator, index, false)?;
                info.missed_blocks_counter -= 1;
            }
            _ => {}
        }

        let min_height = info.start_height + window;
        let max_missed = window - self.params.min_signed_per_window;
        if ctx.height <= min_height || info.missed_blocks_counter <= max_missed {
            return store.set_signing_info(&info);
        }

        let v = store.validator_required(&validator)?;
        if v.jailed || v.status == BondingStatus::Unbonded {
            debug!(validator = %validator, missed = info.missed_blocks_counter, "downtime ignored");
            return store.set_signing_info(&info);
        }

        info!(
            validator = %validator,
            height = ctx.height,
            missed = info.missed_blocks_counter,
            window,
            "validator below signing threshold"
        );
        info.missed_blocks_counter = 0;
        info.index_offset = 0;
        clear_missed_blocks(store, &validator, window);
        store.set_signing_info(&info)?;

        let infraction_height = (ctx.height - self.params.validator_update_delay - 1).max(0);
        self.slash_with_reason(store, ctx, &validator, infraction_height, power, SlashReason::Downtime)?;
        Ok(())
    }

    /// Walk the previous block's commit. Participation is judged as in reward
    /// allocation; `Unknown` votes and votes of unregistered keys are skipped.
    pub fn handle_last_commit<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<()> {
        for vote in &ctx.last_commit {
            let signed = match vote.flag {
                VoteFlag::Unknown => continue,
                flag => flag.is_participating(),
            };
            let validator = keys::validator_address(&vote.validator_public_key.address());
            if store.signing_info(&validator)?.is_none() {
                debug!(public_key = %vote.validator_public_key, "vote from unknown validator skipped");
                continue;
            }
            self.handle_validator_signature(store, ctx, &vote.validator_public_key, vote.vote_power, signed)?;
        }
        Ok(())
    }
}
