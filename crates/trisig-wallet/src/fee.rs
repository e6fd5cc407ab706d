//! Fee and change determination
//!
//! Adding a change output grows the transaction and can push it over a fee
//! step, so the fee is computed twice: once without change and once with it.
//! A third pass re-checks the settled result against the final output set.

use bitcoin::Amount;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use trisig_core::size::{estimate_tx, InputSize, TxSize};

pub use trisig_core::fee::{FeePolicy, BASE_FEE, DUST};

use crate::tx::FeeStrategy;

/// Size passes before the result is considered unstable
pub const MAX_FEE_PASSES: usize = 3;

/// How long coordinator-reported fee rates are reused
pub const FEE_RATE_TTL: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Overspend: inputs {inputs}, outputs {outputs}")]
    Overspend { inputs: Amount, outputs: Amount },

    #[error("Fee did not converge after {passes} passes: settled on {fee}, needs {required}")]
    FeeConvergence {
        passes: usize,
        fee: Amount,
        required: Amount,
    },
}

/// Per-kilobyte rates reported by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRates {
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub high_priority: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub optimal: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub low_priority: Amount,
}

impl FeeRates {
    /// Rate for a strategy; `None` for `ForceFee`.
    pub fn rate_for(&self, strategy: FeeStrategy) -> Option<Amount> {
        match strategy {
            FeeStrategy::BaseFee => Some(BASE_FEE),
            FeeStrategy::HighPriority => Some(self.high_priority),
            FeeStrategy::Optimal => Some(self.optimal),
            FeeStrategy::LowPriority => Some(self.low_priority),
            FeeStrategy::ForceFee => None,
        }
    }

    /// Fee policy for a strategy; `None` for `ForceFee`.
    pub fn policy_for(&self, strategy: FeeStrategy) -> Option<FeePolicy> {
        match strategy {
            FeeStrategy::BaseFee => Some(FeePolicy::base_fee()),
            other => self.rate_for(other).map(|rate| FeePolicy::PerKb {
                rate,
                whole_kb: false,
            }),
        }
    }
}

/// Everything the fee depends on.
#[derive(Debug, Clone)]
pub struct FeeInput<'a> {
    pub inputs: &'a [InputSize],
    pub input_total: Amount,
    /// scriptPubKey lengths of the requested outputs
    pub output_scripts: &'a [usize],
    pub output_total: Amount,
    /// scriptPubKey length of the change output, should one be added
    pub change_script: usize,
}

impl FeeInput<'_> {
    fn size(&self, with_change: bool) -> TxSize {
        if with_change {
            let mut outputs = self.output_scripts.to_vec();
            outputs.push(self.change_script);
            estimate_tx(self.inputs, &outputs)
        } else {
            estimate_tx(self.inputs, self.output_scripts)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeAndChange {
    pub fee: Amount,
    pub change: Amount,
}

impl FeeAndChange {
    fn keep_or_fold(surplus: Amount, fee: Amount) -> Self {
        let change = surplus - fee;
        if change > DUST {
            Self { fee, change }
        } else {
            Self {
                fee: surplus,
                change: Amount::ZERO,
            }
        }
    }
}

/// Settle the fee and change for a set of inputs and outputs.
///
/// Change at or below [`DUST`] is folded into the fee. Re-running with
/// `FeePolicy::Fixed(result.fee)` returns the same result.
pub fn determine_fee_and_change(
    input: &FeeInput<'_>,
    policy: &FeePolicy,
) -> Result<FeeAndChange, FeeError> {
    let overspend = |extra: Amount| FeeError::Overspend {
        inputs: input.input_total,
        outputs: input.output_total + extra,
    };
    let surplus = input
        .input_total
        .checked_sub(input.output_total)
        .ok_or_else(|| overspend(Amount::ZERO))?;

    let result = match *policy {
        FeePolicy::Fixed(fee) => {
            if fee > surplus {
                return Err(overspend(fee));
            }
            FeeAndChange::keep_or_fold(surplus, fee)
        }
        FeePolicy::PerKb { .. } => {
            let fee1 = policy.fee_for(&input.size(false));
            let change1 = surplus.checked_sub(fee1).ok_or_else(|| overspend(fee1))?;
            if change1 == Amount::ZERO {
                return Ok(FeeAndChange {
                    fee: fee1,
                    change: Amount::ZERO,
                });
            }

            let fee2 = policy.fee_for(&input.size(true));
            debug!(
                "Fee without change {}, with change {}, surplus {}",
                fee1, fee2, surplus
            );
            if fee2 > fee1 && fee2 > change1 {
                FeeAndChange {
                    fee: surplus,
                    change: Amount::ZERO,
                }
            } else {
                FeeAndChange::keep_or_fold(surplus, fee2)
            }
        }
    };

    let required = policy.fee_for(&input.size(result.change > Amount::ZERO));
    if required > result.fee {
        return Err(FeeError::FeeConvergence {
            passes: MAX_FEE_PASSES,
            fee: result.fee,
            required,
        });
    }
    Ok(result)
}

/// Fee rates with a soft expiry.
#[derive(Debug, Clone)]
pub struct FeeRateCache {
    entry: Option<(FeeRates, Instant)>,
    ttl: Duration,
}

impl Default for FeeRateCache {
    fn default() -> Self {
        Self::new(FEE_RATE_TTL)
    }
}

impl FeeRateCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    pub fn get(&self) -> Option<FeeRates> {
        match self.entry {
            Some((rates, at)) if at.elapsed() < self.ttl => Some(rates),
            _ => None,
        }
    }

    pub fn store(&mut self, rates: FeeRates) {
        self.entry = Some((rates, Instant::now()));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const P2SH: usize = 23;

    fn btc(sat: u64) -> Amount {
        Amount::from_sat(sat)
    }

    fn multisig() -> InputSize {
        InputSize::p2sh_multisig(2, 3)
    }

    #[test]
    fn test_base_fee_two_inputs_no_change() {
        let inputs = [multisig(), multisig()];
        let input = FeeInput {
            inputs: &inputs,
            input_total: btc(110_000),
            output_scripts: &[P2SH],
            output_total: btc(100_000),
            change_script: P2SH,
        };
        let result = determine_fee_and_change(&input, &FeePolicy::base_fee()).unwrap();
        assert_eq!(result.fee, btc(10_000));
        assert_eq!(result.change, Amount::ZERO);
    }

    #[test]
    fn test_change_output_crosses_fee_step() {
        let inputs = [multisig()];
        let outputs = [P2SH; 21];
        let input = FeeInput {
            inputs: &inputs,
            input_total: btc(100_000_000),
            output_scripts: &outputs,
            output_total: btc(21 * 10_000),
            change_script: P2SH,
        };
        let result = determine_fee_and_change(&input, &FeePolicy::base_fee()).unwrap();
        assert_eq!(result.fee, btc(20_000));
        assert_eq!(result.change, btc(99_770_000));
    }

    #[test]
    fn test_dust_change_folded() {
        let inputs = [multisig()];
        // 10_000 fee leaves 300 sat of change
        let input = FeeInput {
            inputs: &inputs,
            input_total: btc(60_300),
            output_scripts: &[P2SH],
            output_total: btc(50_000),
            change_script: P2SH,
        };
        let result = determine_fee_and_change(&input, &FeePolicy::base_fee()).unwrap();
        assert_eq!(result.fee, btc(10_300));
        assert_eq!(result.change, Amount::ZERO);

        let fixed = determine_fee_and_change(&input, &FeePolicy::Fixed(btc(10_000))).unwrap();
        assert_eq!(fixed, result);
    }

    #[test]
    fn test_change_dropped_when_it_costs_more_than_it_is_worth() {
        // Without change: 1 KB. With change: 2 KB, and the extra 10_000 is
        // more than the 5_000 change would be worth.
        let inputs = [multisig()];
        let outputs = [P2SH; 21];
        let input = FeeInput {
            inputs: &inputs,
            input_total: btc(21 * 10_000 + 15_000),
            output_scripts: &outputs,
            output_total: btc(21 * 10_000),
            change_script: P2SH,
        };
        let result = determine_fee_and_change(&input, &FeePolicy::base_fee()).unwrap();
        assert_eq!(result.fee, btc(15_000));
        assert_eq!(result.change, Amount::ZERO);
    }

    #[test]
    fn test_overspend() {
        let inputs = [multisig()];
        let input = FeeInput {
            inputs: &inputs,
            input_total: btc(10_000),
            output_scripts: &[P2SH],
            output_total: btc(20_000),
            change_script: P2SH,
        };
        assert!(matches!(
            determine_fee_and_change(&input, &FeePolicy::base_fee()),
            Err(FeeError::Overspend { .. })
        ));

        // Covers the outputs but not the fee
        let input = FeeInput {
            input_total: btc(25_000),
            ..input
        };
        assert_eq!(
            determine_fee_and_change(&input, &FeePolicy::base_fee()).unwrap_err(),
            FeeError::Overspend {
                inputs: btc(25_000),
                outputs: btc(30_000)
            }
        );
    }

    #[test]
    fn test_rate_based_fee_is_proportional() {
        let size = estimate_tx(&[multisig()], &[P2SH]);
        let policy = FeePolicy::PerKb {
            rate: btc(1_000),
            whole_kb: false,
        };
        // one satoshi per vbyte
        assert_eq!(policy.fee_for(&size), btc(size.vsize() as u64));
        assert_eq!(FeePolicy::base_fee().fee_for(&size), BASE_FEE);
    }

    #[test]
    fn test_policy_for_strategy() {
        let rates = FeeRates {
            high_priority: btc(3),
            optimal: btc(2),
            low_priority: btc(1),
        };
        assert_eq!(rates.policy_for(FeeStrategy::BaseFee), Some(FeePolicy::base_fee()));
        assert_eq!(
            rates.policy_for(FeeStrategy::Optimal),
            Some(FeePolicy::PerKb {
                rate: btc(2),
                whole_kb: false
            })
        );
        assert_eq!(rates.policy_for(FeeStrategy::ForceFee), None);
    }

    #[test]
    fn test_fee_rate_cache_expiry() {
        let rates = FeeRates {
            high_priority: btc(30_000),
            optimal: btc(20_000),
            low_priority: btc(10_000),
        };
        let mut cache = FeeRateCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);
        cache.store(rates);
        assert_eq!(cache.get(), Some(rates));
        cache.clear();
        assert_eq!(cache.get(), None);

        let mut expired = FeeRateCache::new(Duration::ZERO);
        expired.store(rates);
        assert_eq!(expired.get(), None);
    }

    proptest! {
        #[test]
        fn prop_fee_settlement_is_idempotent(
            values in prop::collection::vec(1_000u64..50_000_000, 1..20),
            outputs in prop::collection::vec(600u64..5_000_000, 1..40),
            segwit in any::<bool>(),
            rate in prop::option::of(1_000u64..200_000),
        ) {
            let input_size = if segwit {
                InputSize::p2sh_p2wsh_multisig(2, 3)
            } else {
                InputSize::p2sh_multisig(2, 3)
            };
            let inputs = vec![input_size; values.len()];
            let scripts = vec![P2SH; outputs.len()];
            let input = FeeInput {
                inputs: &inputs,
                input_total: btc(values.iter().sum()),
                output_scripts: &scripts,
                output_total: btc(outputs.iter().sum()),
                change_script: P2SH,
            };
            let policy = match rate {
                Some(rate) => FeePolicy::PerKb { rate: btc(rate), whole_kb: false },
                None => FeePolicy::base_fee(),
            };

            match determine_fee_and_change(&input, &policy) {
                Ok(result) => {
                    prop_assert!(result.change == Amount::ZERO || result.change > DUST);
                    prop_assert_eq!(
                        result.fee + result.change + input.output_total,
                        input.input_total
                    );
                    let again = determine_fee_and_change(&input, &FeePolicy::Fixed(result.fee));
                    prop_assert_eq!(again, Ok(result));
                }
                Err(FeeError::Overspend { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
