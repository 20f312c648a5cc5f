//! Typed access to staking records on top of any `StateStore`.
//!
//! Records are borsh blobs at their derived address (see `keys`). `None` means
//! absent; a present record always decodes to a value, even an empty one.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::staking::delegation::Delegation;
use crate::staking::power_index::{BondedSet, ValidatorPowerIndex};
use crate::staking::redelegation::Redelegation;
use crate::staking::rewards::LumpSumRewardsRecord;
use crate::staking::signing::ValidatorSigningInfo;
use crate::staking::slashing::EvidenceQueue;
use crate::staking::undelegation::Undelegation;
use crate::staking::unbonding_set::UnbondingSet;
use crate::staking::validator::Validator;
use crate::types::Address;

pub trait DelegationRepository: StateStore {
    fn load<T: BorshDeserialize>(&self, address: &Address) -> Result<Option<T>> {
        self.get_state(address)
            .map(|bytes| borsh::from_slice::<T>(&bytes).map_err(|e| StakingError::Codec(format!("{address}: {e}"))))
            .transpose()
    }

    fn save<T: BorshSerialize>(&mut self, address: Address, record: &T) -> Result<()> {
        let bytes = borsh::to_vec(record)?;
        self.set_state(address, bytes);
        Ok(())
    }

    // validators

    fn validator(&self, address: &Address) -> Result<Option<Validator>> {
        self.load(address)
    }

    fn validator_required(&self, address: &Address) -> Result<Validator> {
        self.validator(address)?.ok_or_else(|| StakingError::not_found("validator", *address))
    }

    fn set_validator(&mut self, validator: &Validator) -> Result<()> {
        self.save(validator.address, validator)
    }

    // delegations

    fn delegation(&self, address: &Address) -> Result<Option<Delegation>> {
        self.load(address)
    }

    fn delegation_required(&self, address: &Address) -> Result<Delegation> {
        self.delegation(address)?.ok_or_else(|| StakingError::not_found("delegation", *address))
    }

    fn set_delegation(&mut self, delegation: &Delegation) -> Result<()> {
        self.save(delegation.address, delegation)
    }

    fn undelegation(&self, address: &Address) -> Result<Option<Undelegation>> {
        self.load(address)
    }

    fn set_undelegation(&mut self, undelegation: &Undelegation) -> Result<()> {
        self.save(undelegation.address, undelegation)
    }

    fn redelegation(&self, address: &Address) -> Result<Option<Redelegation>> {
        self.load(address)
    }

    fn set_redelegation(&mut self, redelegation: &Redelegation) -> Result<()> {
        self.save(redelegation.address, redelegation)
    }

    // global registries

    fn unbonding_set(&self) -> Result<UnbondingSet> {
        Ok(self.load(&keys::UNBONDING_SET)?.unwrap_or_default())
    }

    fn set_unbonding_set(&mut self, set: &UnbondingSet) -> Result<()> {
        self.save(keys::UNBONDING_SET, set)
    }

    fn power_index(&self) -> Result<ValidatorPowerIndex> {
        Ok(self.load(&keys::POWER_INDEX)?.unwrap_or_default())
    }

    fn set_power_index(&mut self, index: &ValidatorPowerIndex) -> Result<()> {
        self.save(keys::POWER_INDEX, index)
    }

    fn bonded_set(&self) -> Result<BondedSet> {
        Ok(self.load(&keys::BONDED_SET)?.unwrap_or_default())
    }

    fn set_bonded_set(&mut self, set: &BondedSet) -> Result<()> {
        self.save(keys::BONDED_SET, set)
    }

    fn evidence_queue(&self) -> Result<EvidenceQueue> {
        Ok(self.load(&keys::EVIDENCE_QUEUE)?.unwrap_or_default())
    }

    fn set_evidence_queue(&mut self, queue: &EvidenceQueue) -> Result<()> {
        self.save(keys::EVIDENCE_QUEUE, queue)
    }

    // signing

    fn signing_info(&self, validator: &Address) -> Result<Option<ValidatorSigningInfo>> {
        self.load(&keys::signing_info_address(validator))
    }

    fn set_signing_info(&mut self, info: &ValidatorSigningInfo) -> Result<()> {
        self.save(keys::signing_info_address(&info.address), info)
    }

    // lump-sum rewards

    fn current_rewards_record(&self, validator: &Address) -> Result<Option<LumpSumRewardsRecord>> {
        self.load(&keys::current_rewards_record_address(validator))
    }

    fn set_current_rewards_record(&mut self, record: &LumpSumRewardsRecord) -> Result<()> {
        self.save(keys::current_rewards_record_address(&record.address), record)
    }

    fn closed_rewards_record(&self, validator: &Address, start_height: i64) -> Result<Option<LumpSumRewardsRecord>> {
        self.load(&keys::rewards_record_address(validator, start_height))
    }

    fn set_closed_rewards_record(&mut self, record: &LumpSumRewardsRecord) -> Result<()> {
        self.save(keys::rewards_record_address(&record.address, record.start_height), record)
    }
}

impl<S: StateStore + ?Sized> DelegationRepository for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTx;
    use crate::staking::unbonding_set::UnbondingSet;

    #[test]
    fn absent_is_distinct_from_empty() {
        let mut tx = LedgerTx::default();
        assert!(tx.load::<UnbondingSet>(&keys::UNBONDING_SET).unwrap().is_none());

        tx.set_unbonding_set(&UnbondingSet::default()).unwrap();
        let stored = tx.load::<UnbondingSet>(&keys::UNBONDING_SET).unwrap();
        assert_eq!(stored, Some(UnbondingSet::default()));
    }

    #[test]
    fn missing_validator_is_not_found() {
        let tx = LedgerTx::default();
        let addr = Address::reserved(0x99);
        assert_eq!(
            tx.validator_required(&addr).unwrap_err(),
            StakingError::NotFound { kind: "validator", address: addr }
        );
    }

    #[test]
    fn garbage_bytes_surface_as_codec_error() {
        let mut tx = LedgerTx::default();
        let addr = Address::reserved(0x77);
        tx.set_state(addr, vec![0xff]);
        assert!(matches!(tx.validator(&addr), Err(StakingError::Codec(_))));
    }
}
