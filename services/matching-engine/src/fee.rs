//! Fee allocation and validation for matched transactions
//!
//! Every participant pays a minimum fee of `ceil(receive / 1000)` on what it
//! receives. The price difference left on a maker's leg goes to the fee
//! bucket in full; on the taker's leg only its own minimum fee is taken and
//! the rest is paid out to the taker.
//!
//! Blocks below the legacy epoch were produced under an older rule that
//! accepts any fee in `[ceil(receive / 1000), ceil(receive * max_rate)]`.

use crate::errors::FeeError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use types::ids::AssetId;

/// Divisor of the minimum fee.
pub const MIN_FEE_DIVISOR: u64 = 1000;

/// Absolute slack accepted between charged and expected fee.
pub const FEE_TOLERANCE: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetAmount {
    pub asset_id: AssetId,
    pub amount: u64,
}

impl AssetAmount {
    pub fn new(asset_id: AssetId, amount: u64) -> Self {
        Self { asset_id, amount }
    }
}

/// Final payouts and fees, index-aligned with the orders of the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedAssets {
    pub receives: Vec<AssetAmount>,
    pub fees: Vec<AssetAmount>,
}

pub trait FeeStrategy: Send + Sync {
    /// Split each order's gross receive amount and price difference into
    /// payout and fee. `price_diffs[i]` is in the same asset as
    /// `receive_amounts[i]`.
    fn allocate(
        &self,
        receive_amounts: &[AssetAmount],
        price_diffs: &[AssetAmount],
        taker_index: usize,
    ) -> AllocatedAssets;

    /// Check the fees actually charged by a matched transaction.
    fn validate(
        &self,
        receive_amounts: &[AssetAmount],
        price_diffs: &[AssetAmount],
        fee_amounts: &BTreeMap<AssetId, u64>,
        taker_index: usize,
        block_height: u64,
    ) -> Result<(), FeeError>;
}

/// `ceil(amount / 1000)`
pub fn min_fee(amount: u64) -> u64 {
    amount / MIN_FEE_DIVISOR + u64::from(amount % MIN_FEE_DIVISOR != 0)
}

#[derive(Debug, Clone)]
pub struct DefaultFeeStrategy {
    legacy_epoch_height: u64,
    legacy_max_fee_rate: Decimal,
}

impl DefaultFeeStrategy {
    pub fn new(legacy_epoch_height: u64, legacy_max_fee_rate: Decimal) -> Self {
        Self {
            legacy_epoch_height,
            legacy_max_fee_rate,
        }
    }

    fn legacy_max_fee(&self, amount: u64) -> u64 {
        (Decimal::from(amount) * self.legacy_max_fee_rate)
            .ceil()
            .to_u64()
            .unwrap_or(u64::MAX)
    }

    fn validate_legacy(
        &self,
        receive_amounts: &[AssetAmount],
        fee_amounts: &BTreeMap<AssetId, u64>,
    ) -> Result<(), FeeError> {
        for receive in receive_amounts {
            let actual = fee_amounts.get(&receive.asset_id).copied().unwrap_or(0);
            let min = min_fee(receive.amount);
            let max = self.legacy_max_fee(receive.amount).max(min);
            if actual < min || actual > max {
                return Err(FeeError::FeeOutOfRange {
                    asset: receive.asset_id,
                    actual,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

impl Default for DefaultFeeStrategy {
    fn default() -> Self {
        Self::new(0, Decimal::new(5, 2))
    }
}

impl FeeStrategy for DefaultFeeStrategy {
    fn allocate(
        &self,
        receive_amounts: &[AssetAmount],
        price_diffs: &[AssetAmount],
        taker_index: usize,
    ) -> AllocatedAssets {
        let mut receives = Vec::with_capacity(receive_amounts.len());
        let mut fees = Vec::with_capacity(receive_amounts.len());

        for (i, receive) in receive_amounts.iter().enumerate() {
            let diff = price_diffs.get(i).map_or(0, |d| d.amount);
            let base_fee = min_fee(receive.amount);
            let (payout, fee) = if i == taker_index {
                let diff_fee = min_fee(diff);
                (receive.amount - base_fee + (diff - diff_fee), base_fee + diff_fee)
            } else {
                (receive.amount - base_fee, base_fee + diff)
            };
            receives.push(AssetAmount::new(receive.asset_id, payout));
            fees.push(AssetAmount::new(receive.asset_id, fee));
        }

        AllocatedAssets { receives, fees }
    }

    fn validate(
        &self,
        receive_amounts: &[AssetAmount],
        price_diffs: &[AssetAmount],
        fee_amounts: &BTreeMap<AssetId, u64>,
        taker_index: usize,
        block_height: u64,
    ) -> Result<(), FeeError> {
        if receive_amounts.len() != price_diffs.len() {
            return Err(FeeError::LengthMismatch {
                receives: receive_amounts.len(),
                price_diffs: price_diffs.len(),
            });
        }
        if block_height < self.legacy_epoch_height {
            return self.validate_legacy(receive_amounts, fee_amounts);
        }

        let expected = self.allocate(receive_amounts, price_diffs, taker_index);
        for fee in &expected.fees {
            let actual = fee_amounts.get(&fee.asset_id).copied().unwrap_or(0);
            if actual.abs_diff(fee.amount) > FEE_TOLERANCE {
                return Err(FeeError::InvalidAmountOfFee {
                    asset: fee.asset_id,
                    actual,
                    expected: fee.amount,
                });
            }
        }
        Ok(())
    }
}

/// Charges nothing and accepts anything; for tests and simulations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroFeeStrategy;

impl FeeStrategy for ZeroFeeStrategy {
    fn allocate(
        &self,
        receive_amounts: &[AssetAmount],
        price_diffs: &[AssetAmount],
        taker_index: usize,
    ) -> AllocatedAssets {
        let receives = receive_amounts
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let refund = if i == taker_index {
                    price_diffs.get(i).map_or(0, |d| d.amount)
                } else {
                    0
                };
                AssetAmount::new(r.asset_id, r.amount + refund)
            })
            .collect();
        let fees = receive_amounts
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let kept = if i == taker_index {
                    0
                } else {
                    price_diffs.get(i).map_or(0, |d| d.amount)
                };
                AssetAmount::new(r.asset_id, kept)
            })
            .collect();
        AllocatedAssets { receives, fees }
    }

    fn validate(
        &self,
        _receive_amounts: &[AssetAmount],
        _price_diffs: &[AssetAmount],
        _fee_amounts: &BTreeMap<AssetId, u64>,
        _taker_index: usize,
        _block_height: u64,
    ) -> Result<(), FeeError> {
        Ok(())
    }
}
