//! Error taxonomy for matching, fees and block processing

use persistence::StoreError;
use thiserror::Error;
use types::errors::TypesError;
use types::ids::AssetId;

/// Errors from the order book and the matching engine.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("The trade pairs in the tx input is invalid: {0}")]
    InvalidTradePairs(String),

    #[error("Orders do not form a closed trade cycle")]
    OpenCycle,

    #[error("No matchable orders for the given trade pairs")]
    NotMatched,

    #[error("request amount of order less than one or big than max of int64")]
    RequestAmountMath,

    #[error("Order book inconsistent: {0}")]
    OrderBookInconsistent(String),

    #[error("rate of order must not exceed the best in-flight order of trade pair {pair}")]
    OrderOutOfSequence { pair: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Order decode error: {0}")]
    Types(#[from] TypesError),
}

impl MatchError {
    pub fn is_fatal(&self) -> bool {
        match self {
            MatchError::Store(e) => e.is_fatal(),
            MatchError::OrderBookInconsistent(_) => true,
            _ => false,
        }
    }
}

/// Fee policy violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("amount of fee is invalid: asset {asset} charged {actual}, expected {expected}")]
    InvalidAmountOfFee {
        asset: AssetId,
        actual: u64,
        expected: u64,
    },

    #[error("amount of fee is invalid: asset {asset} charged {actual}, allowed [{min}, {max}]")]
    FeeOutOfRange {
        asset: AssetId,
        actual: u64,
        min: u64,
        max: u64,
    },

    #[error("Fee input length mismatch: {receives} receives, {price_diffs} price diffs")]
    LengthMismatch { receives: usize, price_diffs: usize },
}

/// Errors surfaced by block application, validation and proposal.
#[derive(Error, Debug)]
pub enum MovError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Fee error: {0}")]
    Fee(#[from] FeeError),

    #[error("Order decode error: {0}")]
    Types(#[from] TypesError),

    #[error("mov chain status has already initialized")]
    ChainStatusAlreadyInit,

    #[error("mov chain status is not initialized")]
    NotInitChainStatus,

    #[error("The trade pairs in the tx input is invalid")]
    InvalidTradePairs,

    #[error("status fail of transaction does not allow to be true")]
    StatusFailMustFalse,

    #[error("input program of trade tx must p2wmc script")]
    InputProgramMustP2WMCScript,

    #[error("can't exist cancel order in the matched transaction")]
    ExistCancelOrderInMatchedTx,

    #[error("can't exist trade in the cancel order transaction")]
    ExistTradeInCancelOrderTx,

    #[error("asset id must unique in matched transaction")]
    AssetIdMustUniqueInMatchedTx,

    #[error("ratio arguments must greater than zero")]
    RatioOfTradeLessThanZero,

    #[error("spend output id of matched tx is not equals to actual matched tx")]
    SpendOutputIdIsIncorrect,

    #[error("request amount of order less than one or big than max of int64")]
    RequestAmountMath,

    #[error("order in matched tx is not matched")]
    NotMatchedOrder,

    #[error("reward program is not configured properly")]
    NotConfiguredRewardProgram,

    #[error("the reward program is not correct: {0}")]
    RewardProgramIsWrong(String),

    #[error("{results} verify results for {txs} transactions")]
    VerifyResultsMismatch { txs: usize, results: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Collector task failed: {0}")]
    Collector(String),
}

impl MovError {
    /// Storage failure or broken internal invariant; the host decides
    /// whether to halt. Everything else rejects only the block or tx.
    pub fn is_fatal(&self) -> bool {
        match self {
            MovError::Store(e) => e.is_fatal(),
            MovError::Match(e) => e.is_fatal(),
            MovError::Collector(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::KvError;

    #[test]
    fn test_fatal_propagates_through_match_error() {
        let store = StoreError::Kv(KvError::Serialization("bad".into()));
        let err: MovError = MatchError::from(store).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_policy_errors_are_not_fatal() {
        assert!(!MovError::AssetIdMustUniqueInMatchedTx.is_fatal());
        assert!(!MovError::from(StoreError::NotInitialized).is_fatal());
    }

    #[test]
    fn test_fee_error_display() {
        let err = FeeError::InvalidAmountOfFee {
            asset: AssetId::new([1; 32]),
            actual: 3,
            expected: 1,
        };
        assert!(err.to_string().starts_with("amount of fee is invalid"));
    }
}
