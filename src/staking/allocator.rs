//! Распределение награды блока.
//!
//! Пул `REWARD_ALLOCATION_POOL` делится на долю proposer (base + bonus,
//! взвешенный долей подписавшей мощности) и долю голосовавших валидаторов
//! пропорционально их мощности. С доли валидатора снимается комиссия оператора,
//! остальное уходит в его reward pool для делегаторов. Остаток идёт в community pool.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::{BlockContext, StakingEngine, VoteInfo};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{mul_div, Address, Amount};

fn sum_power<'a>(mut votes: impl Iterator<Item = &'a VoteInfo>) -> Result<u128> {
    votes.try_fold(0u128, |acc, v| acc.checked_add(v.vote_power).ok_or(StakingError::Overflow))
}

impl StakingEngine {
    /// Распределить пул наград блока. Возвращает валидаторов, чей reward pool пополнен.
    pub fn allocate_reward<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<BTreeSet<Address>> {
        let total_power = sum_power(ctx.last_commit.iter())?;
        let signed_power = sum_power(ctx.last_commit.iter().filter(|v| v.flag.is_participating()))?;
        let mut credited = BTreeSet::new();

        let proposer = match ctx.proposer {
            Some(op) if store.validator(&keys::validator_address(&op))?.is_some() => Some(op),
            Some(op) => {
                debug!(proposer = %op, "proposer has no validator, its reward goes to the community pool");
                None
            }
            None => None,
        };

        for currency in &self.params.reward_currencies {
            let pool = store.balance(&keys::REWARD_ALLOCATION_POOL, currency);
            if pool.is_zero() {
                continue;
            }
            if total_power == 0 {
                store.transfer_asset(&keys::REWARD_ALLOCATION_POOL, &keys::COMMUNITY_POOL, &pool)?;
                continue;
            }

            let base = self.params.base_proposer_reward.apply(pool.raw)?;
            let bonus = mul_div(self.params.bonus_proposer_reward.apply(pool.raw)?, signed_power, total_power)?;
            let proposer_reward = Amount::new(currency.clone(), base.checked_add(bonus).ok_or(StakingError::Overflow)?);
            if let Some(op) = proposer {
                store.transfer_asset(
                    &keys::REWARD_ALLOCATION_POOL,
                    &keys::operator_reward_address(&op),
                    &proposer_reward,
                )?;
            }

            let distributable = pool.saturating_sub(&proposer_reward)?;
            for vote in ctx.last_commit.iter().filter(|v| v.flag.is_participating()) {
                let operator = vote.validator_public_key.address();
                let validator = keys::validator_address(&operator);
                if store.validator(&validator)?.is_none() {
                    continue;
                }
                let reward = distributable.mul_div(vote.vote_power, total_power)?;
                let commission = Amount::new(currency.clone(), self.params.commission.apply(reward.raw)?);
                let delegators = reward.checked_sub(&commission)?;
                store.transfer_asset(
                    &keys::REWARD_ALLOCATION_POOL,
                    &keys::operator_reward_address(&operator),
                    &commission,
                )?;
                store.transfer_asset(
                    &keys::REWARD_ALLOCATION_POOL,
                    &keys::reward_pool_address(&validator),
                    &delegators,
                )?;
                if !delegators.is_zero() {
                    credited.insert(validator);
                }
            }

            let leftover = store.balance(&keys::REWARD_ALLOCATION_POOL, currency);
            store.transfer_asset(&keys::REWARD_ALLOCATION_POOL, &keys::COMMUNITY_POOL, &leftover)?;
            debug!(
                height = ctx.height,
                pool = %pool,
                proposer_reward = %proposer_reward,
                community = %leftover,
                "block reward allocated"
            );
        }
        Ok(credited)
    }

    /// Вывести накопленные комиссию и награды proposer на счёт оператора.
    pub fn claim_validator_reward<S: StateStore>(&self, store: &mut S, operator: Address) -> Result<Vec<Amount>> {
        store.validator_required(&keys::validator_address(&operator))?;
        let from = keys::operator_reward_address(&operator);
        let mut paid = Vec::new();
        for currency in &self.params.reward_currencies {
            let amount = store.balance(&from, currency);
            if amount.is_zero() {
                continue;
            }
            store.transfer_asset(&from, &operator, &amount)?;
            paid.push(amount);
        }
        info!(operator = %operator, paid = ?paid, "validator reward claimed");
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StakingError;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;
    use crate::staking::{VoteFlag, VoteInfo};

    fn vote(seed: u8, power: u128, flag: VoteFlag) -> VoteInfo {
        VoteInfo { validator_public_key: public_key(seed), vote_power: power, flag }
    }

    fn setup(pool: u128) -> (StakingEngine, LedgerTx, Address, Address) {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let a = create_validator(&engine, &mut tx, 1, 1, 100);
        let b = create_validator(&engine, &mut tx, 1, 2, 100);
        tx.mint_asset(&keys::REWARD_ALLOCATION_POOL, &gov_amount(pool)).unwrap();
        (engine, tx, a, b)
    }

    #[test]
    fn full_participation_splits_whole_pool() {
        let (engine, mut tx, a, b) = setup(1_000);
        let mut block = ctx(3);
        block.proposer = Some(operator(1));
        block.last_commit = vec![vote(1, 100, VoteFlag::PreCommit), vote(2, 100, VoteFlag::PreCommit)];
        let credited = engine.allocate_reward(&mut tx, &block).unwrap();
        assert_eq!(credited, BTreeSet::from([a, b]));

        // base 10 + bonus 40, then 950 / 2 = 475 each with 10% commission
        assert_eq!(gov_of(&tx, &keys::operator_reward_address(&operator(1))), 50 + 47);
        assert_eq!(gov_of(&tx, &keys::operator_reward_address(&operator(2))), 47);
        assert_eq!(gov_of(&tx, &keys::reward_pool_address(&a)), 428);
        assert_eq!(gov_of(&tx, &keys::reward_pool_address(&b)), 428);
        assert_eq!(gov_of(&tx, &keys::COMMUNITY_POOL), 0);
        assert_eq!(gov_of(&tx, &keys::REWARD_ALLOCATION_POOL), 0);
    }

    #[test]
    fn absent_voter_share_goes_to_community() {
        let (engine, mut tx, a, b) = setup(1_000);
        let mut block = ctx(3);
        block.proposer = Some(operator(1));
        block.last_commit = vec![vote(1, 100, VoteFlag::PreCommit), vote(2, 100, VoteFlag::Null)];
        let credited = engine.allocate_reward(&mut tx, &block).unwrap();
        assert_eq!(credited, BTreeSet::from([a]));

        // bonus scaled by signed power: 40 * 100/200
        assert_eq!(gov_of(&tx, &keys::operator_reward_address(&operator(1))), 30 + 48);
        assert_eq!(gov_of(&tx, &keys::reward_pool_address(&a)), 437);
        assert_eq!(gov_of(&tx, &keys::reward_pool_address(&b)), 0);
        assert_eq!(gov_of(&tx, &keys::COMMUNITY_POOL), 485);
    }

    #[test]
    fn no_votes_sends_everything_to_community() {
        let (engine, mut tx, _, _) = setup(300);
        let mut block = ctx(3);
        block.proposer = Some(operator(1));
        engine.allocate_reward(&mut tx, &block).unwrap();
        assert_eq!(gov_of(&tx, &keys::COMMUNITY_POOL), 300);
        assert_eq!(gov_of(&tx, &keys::operator_reward_address(&operator(1))), 0);
    }

    #[test]
    fn unknown_proposer_reward_is_not_lost() {
        let (engine, mut tx, _, _) = setup(1_000);
        let mut block = ctx(3);
        block.proposer = Some(account(42));
        block.last_commit = vec![vote(1, 100, VoteFlag::PreCommit), vote(2, 100, VoteFlag::PreCommit)];
        engine.allocate_reward(&mut tx, &block).unwrap();
        assert_eq!(gov_of(&tx, &keys::COMMUNITY_POOL), 50);
        assert_eq!(gov_of(&tx, &keys::operator_reward_address(&account(42))), 0);
    }

    #[test]
    fn vote_power_overflow_is_rejected() {
        let (engine, mut tx, _, _) = setup(1_000);
        let mut block = ctx(3);
        block.last_commit = vec![vote(1, u128::MAX, VoteFlag::PreCommit), vote(2, 1, VoteFlag::PreCommit)];
        assert!(matches!(engine.allocate_reward(&mut tx, &block), Err(StakingError::Overflow)));
        assert_eq!(gov_of(&tx, &keys::REWARD_ALLOCATION_POOL), 1_000);
    }

    #[test]
    fn operator_withdraws_commission() {
        let (engine, mut tx, _, _) = setup(1_000);
        let mut block = ctx(3);
        block.last_commit = vec![vote(1, 100, VoteFlag::PreCommit)];
        engine.allocate_reward(&mut tx, &block).unwrap();

        let paid = engine.claim_validator_reward(&mut tx, operator(1)).unwrap();
        // (1000 - 10 - 40) * 100/100 = 950, 10% commission
        assert_eq!(paid, vec![gov_amount(95)]);
        assert_eq!(gov_of(&tx, &operator(1)), 95);
        assert!(engine.claim_validator_reward(&mut tx, operator(1)).unwrap().is_empty());
        assert!(matches!(
            engine.claim_validator_reward(&mut tx, account(42)),
            Err(StakingError::NotFound { .. })
        ));
    }
}
