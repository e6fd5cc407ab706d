//! Fee policy and dust limit shared by spending and sweeping

use bitcoin::Amount;

use crate::size::TxSize;

/// Outputs at or below this value are not worth creating
pub const DUST: Amount = Amount::from_sat(546);

/// Flat per-kilobyte fee used by the `BaseFee` strategy
pub const BASE_FEE: Amount = Amount::from_sat(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    Fixed(Amount),
    /// `rate` per 1000 vbytes; `whole_kb` charges every started kilobyte
    /// in full.
    PerKb { rate: Amount, whole_kb: bool },
}

impl FeePolicy {
    pub fn base_fee() -> Self {
        FeePolicy::PerKb {
            rate: BASE_FEE,
            whole_kb: true,
        }
    }

    pub fn fee_for(&self, size: &TxSize) -> Amount {
        match *self {
            FeePolicy::Fixed(fee) => fee,
            FeePolicy::PerKb { rate, whole_kb } => {
                let vsize = size.vsize() as u64;
                if whole_kb {
                    Amount::from_sat(vsize.div_ceil(1000) * rate.to_sat())
                } else {
                    Amount::from_sat((vsize * rate.to_sat()).div_ceil(1000))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(base: usize) -> TxSize {
        TxSize { base, witness: 0 }
    }

    #[test]
    fn test_base_fee_charges_started_kilobytes() {
        let policy = FeePolicy::base_fee();
        assert_eq!(policy.fee_for(&size(1)), BASE_FEE);
        assert_eq!(policy.fee_for(&size(1000)), BASE_FEE);
        assert_eq!(policy.fee_for(&size(1001)), BASE_FEE * 2);
    }

    #[test]
    fn test_rate_rounds_up_to_a_satoshi() {
        let policy = FeePolicy::PerKb {
            rate: Amount::from_sat(1_001),
            whole_kb: false,
        };
        assert_eq!(policy.fee_for(&size(250)), Amount::from_sat(251));
        assert_eq!(FeePolicy::Fixed(DUST).fee_for(&size(5000)), DUST);
    }
}
