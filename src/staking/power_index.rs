//! Индекс мощности валидаторов и выбор активного сета.
//!
//! Индекс упорядочен по consensus token (по убыванию), затем по адресу, и не
//! содержит jailed-валидаторов.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::info;

use super::validator::{consensus_token_of, Validator};
use super::{BlockContext, StakingEngine};
use crate::error::Result;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, PublicKey};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PowerEntry {
    pub validator_address: Address,
    pub operator_public_key: PublicKey,
    pub consensus_token: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorPowerIndex {
    entries: Vec<PowerEntry>,
}

impl ValidatorPowerIndex {
    pub fn entries(&self) -> &[PowerEntry] {
        &self.entries
    }

    pub fn contains(&self, validator: &Address) -> bool {
        self.entries.iter().any(|e| &e.validator_address == validator)
    }

    pub fn remove(&mut self, validator: &Address) {
        self.entries.retain(|e| &e.validator_address != validator);
    }

    pub fn upsert(&mut self, entry: PowerEntry) {
        self.remove(&entry.validator_address);
        let pos = self
            .entries
            .partition_point(|e| (e.consensus_token, entry.validator_address) > (entry.consensus_token, e.validator_address));
        self.entries.insert(pos, entry);
    }

    /// Up to `n` entries with non-zero power, strongest first.
    pub fn top(&self, n: usize) -> impl Iterator<Item = &PowerEntry> {
        self.entries.iter().filter(|e| e.consensus_token > 0).take(n)
    }
}

/// Re-read a validator's power into the index; jailed validators are dropped.
pub(crate) fn refresh<S: StateStore + ?Sized>(store: &mut S, validator: &Validator) -> Result<()> {
    let mut index = store.power_index()?;
    if validator.jailed {
        index.remove(&validator.address);
    } else {
        index.upsert(PowerEntry {
            validator_address: validator.address,
            operator_public_key: validator.operator_public_key,
            consensus_token: consensus_token_of(&*store, &validator.address).raw,
        });
    }
    store.set_power_index(&index)
}

/// Last reported active set and the power reported for each member.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BondedSet {
    pub validators: BTreeMap<Address, (PublicKey, u128)>,
}

/// Change of voting power handed to the consensus engine. Power 0 removes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorUpdate {
    pub public_key: PublicKey,
    pub power: u128,
}

impl StakingEngine {
    /// Pick the top `max_validators` from the power index, bond newcomers and
    /// unbond validators that dropped out. Returns the power changes.
    pub fn update_validator_set<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<Vec<ValidatorUpdate>> {
        let index = store.power_index()?;
        let previous = store.bonded_set()?;
        let mut next = BondedSet::default();
        for e in index.top(self.params.max_validators as usize) {
            next.validators.insert(e.validator_address, (e.operator_public_key, e.consensus_token));
        }

        let mut updates = Vec::new();
        for (addr, (pk, _)) in &previous.validators {
            if !next.validators.contains_key(addr) {
                self.unbond_validator(store, ctx, addr)?;
                updates.push(ValidatorUpdate { public_key: *pk, power: 0 });
            }
        }
        for (addr, (pk, power)) in &next.validators {
            self.bond_validator(store, addr)?;
            if previous.validators.get(addr).map(|(_, p)| p) != Some(power) {
                updates.push(ValidatorUpdate { public_key: *pk, power: *power });
            }
        }

        if !updates.is_empty() {
            info!(height = ctx.height, active = next.validators.len(), changes = updates.len(), "validator set updated");
        }
        store.set_bonded_set(&next)?;
        Ok(updates)
    }
}
