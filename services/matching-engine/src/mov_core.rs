//! Block-level entry points of the matching subsystem
//!
//! `MovCore` keeps the order store in step with the chain (apply/detach),
//! validates blocks by replaying their order flow through a fresh order
//! book, and proposes matched transactions for a new block.

use crate::book::OrderBook;
use crate::collector::MatchCollector;
use crate::config::MovConfig;
use crate::errors::MovError;
use crate::fee::{DefaultFeeStrategy, FeeStrategy};
use crate::matching::crossing::calc_request_amount;
use crate::matching::{calc_settlement, is_matched, taker_index, validate_trade_pairs};
use crate::tx_orders::{
    add_orders_from_tx, calc_fee_amount, delete_orders_from_tx, is_cancel_order_tx, is_matched_tx,
    merge_orders, trade_pairs_from_matched_tx,
};
use persistence::{MovStore, StoreError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};
use types::ids::{AssetId, Hash};
use types::order::Order;
use types::program::{decode_p2wmc_program, is_cancel_clause_selector, is_p2wmc_program};
use types::tx::{Block, Tx};

/// Outcome of the host's script verification for one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxVerifyResult {
    pub status_fail: bool,
}

/// Raw order changes of a block, in transaction order.
#[derive(Debug, Default)]
struct BlockOrders {
    add: Vec<Order>,
    delete: Vec<Order>,
}

pub struct MovCore {
    store: Arc<dyn MovStore>,
    config: MovConfig,
    fee_strategy: Arc<dyn FeeStrategy>,
}

impl MovCore {
    pub fn new(store: Arc<dyn MovStore>, config: MovConfig) -> Result<Self, MovError> {
        let fee_strategy = Arc::new(DefaultFeeStrategy::new(
            config.legacy_fee_epoch_height,
            config.legacy_max_fee_rate,
        ));
        Self::with_fee_strategy(store, config, fee_strategy)
    }

    pub fn with_fee_strategy(
        store: Arc<dyn MovStore>,
        config: MovConfig,
        fee_strategy: Arc<dyn FeeStrategy>,
    ) -> Result<Self, MovError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            fee_strategy,
        })
    }

    pub fn name(&self) -> &'static str {
        "MOV"
    }

    pub fn start_height(&self) -> u64 {
        self.config.start_block_height
    }

    pub fn config(&self) -> &MovConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MovStore> {
        &self.store
    }

    /// Height and hash the order store is synchronized to.
    pub fn chain_status(&self) -> Result<(u64, Hash), MovError> {
        match self.store.get_mov_database_state() {
            Ok(state) => Ok((state.height, state.hash)),
            Err(StoreError::NotInitialized) => Err(MovError::NotInitChainStatus),
            Err(e) => Err(e.into()),
        }
    }

    /// Anchor the store at the start block.
    pub fn init_chain_status(&self, start_hash: &Hash) -> Result<(), MovError> {
        match self.store.init_db_state(self.config.start_block_height, start_hash) {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyInitialized) => Err(MovError::ChainStatusAlreadyInit),
            Err(e) => Err(e.into()),
        }
    }

    pub fn apply_block(&self, block: &Block) -> Result<(), MovError> {
        let height = block.height();
        if height < self.config.start_block_height {
            return Ok(());
        }
        if height == self.config.start_block_height {
            self.init_chain_status(&block.hash())?;
            info!(height, hash = %block.hash(), "mov chain status initialized");
            return Ok(());
        }

        let orders = self.replay_block(block, false)?;
        let (add, delete) = merge_orders(orders.add, orders.delete);
        self.store.process_orders(&add, &delete, &block.header)?;
        info!(
            height,
            hash = %block.hash(),
            added = add.len(),
            deleted = delete.len(),
            "mov block applied"
        );
        Ok(())
    }

    pub fn detach_block(&self, block: &Block) -> Result<(), MovError> {
        let height = block.height();
        if height < self.config.start_block_height {
            return Ok(());
        }
        if height == self.config.start_block_height {
            self.store.clear()?;
            info!(height, "mov store cleared on detaching start block");
            return Ok(());
        }

        let mut created = Vec::new();
        let mut spent = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            created.extend(add_orders_from_tx(tx, height, index as u64)?);
            spent.extend(delete_orders_from_tx(tx)?);
        }
        let (created, spent) = merge_orders(created, spent);
        let restore = match self.store.deleted_orders_at(height)? {
            Some(orders) => orders,
            None => {
                debug!(height, "no undo row, restoring orders from spends");
                spent
            }
        };

        self.store.process_orders(&restore, &created, &block.header)?;
        info!(
            height,
            hash = %block.hash(),
            restored = restore.len(),
            removed = created.len(),
            "mov block detached"
        );
        Ok(())
    }

    /// Check every transaction, then replay the block's order flow.
    pub fn validate_block(&self, block: &Block, verify_results: &[TxVerifyResult]) -> Result<(), MovError> {
        let height = block.height();
        if height <= self.config.start_block_height {
            return Ok(());
        }
        if verify_results.len() != block.transactions.len() {
            return Err(MovError::VerifyResultsMismatch {
                txs: block.transactions.len(),
                results: verify_results.len(),
            });
        }
        for (tx, result) in block.transactions.iter().zip(verify_results) {
            self.validate_tx(tx, result, height)?;
        }
        self.replay_block(block, true)?;
        Ok(())
    }

    pub fn validate_tx(&self, tx: &Tx, verify_result: &TxVerifyResult, block_height: u64) -> Result<(), MovError> {
        if block_height <= self.config.start_block_height {
            return Ok(());
        }
        if verify_result.status_fail {
            return Err(MovError::StatusFailMustFalse);
        }

        if is_matched_tx(tx) {
            self.validate_matched_tx(tx, block_height)?;
        } else if is_cancel_order_tx(tx) {
            validate_cancel_order_tx(tx)?;
        }

        for output in &tx.outputs {
            if is_p2wmc_program(&output.control_program) {
                validate_magnetic_contract_args(&output.asset_id, output.amount, &output.control_program)?;
            }
        }
        Ok(())
    }

    /// Matched transactions for a block whose ordinary transactions are
    /// already chosen. They are meant to be appended after those.
    pub async fn before_proposal_block(
        &self,
        block: &Block,
        gas_left: u64,
        deadline: Instant,
    ) -> Result<Vec<Tx>, MovError> {
        let height = block.height();
        if height <= self.config.start_block_height {
            return Ok(Vec::new());
        }

        let mut arrival_add = Vec::new();
        let mut arrival_del = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            arrival_add.extend(add_orders_from_tx(tx, height, index as u64)?);
            arrival_del.extend(delete_orders_from_tx(tx)?);
        }

        let reward_program = self.config.reward_program(height)?;
        let collected = MatchCollector::new(
            self.store.clone(),
            self.fee_strategy.clone(),
            reward_program,
            arrival_add,
            arrival_del,
            &self.config,
        )
        .collect(gas_left, deadline)
        .await?;

        // Group by market; the sort is stable so each market keeps its sequence
        let mut txs = collected.txs;
        txs.sort_by_cached_key(market_key);
        Ok(txs)
    }

    /// A transaction trading an order that did not come out of the engine.
    pub fn is_dust(&self, tx: &Tx) -> bool {
        tx.inputs
            .iter()
            .any(|i| is_p2wmc_program(&i.control_program) && !is_cancel_clause_selector(i))
    }

    fn validate_matched_tx(&self, tx: &Tx, block_height: u64) -> Result<(), MovError> {
        let mut from_assets = HashSet::new();
        let mut to_assets = HashSet::new();
        for (i, input) in tx.inputs.iter().enumerate() {
            if !is_p2wmc_program(&input.control_program) {
                return Err(MovError::InputProgramMustP2WMCScript);
            }
            if is_cancel_clause_selector(input) {
                return Err(MovError::ExistCancelOrderInMatchedTx);
            }
            let order = Order::from_input(tx, i)?;
            from_assets.insert(order.from_asset_id);
            to_assets.insert(order.to_asset_id);
        }
        if from_assets.len() != tx.inputs.len() || to_assets.len() != tx.inputs.len() {
            return Err(MovError::AssetIdMustUniqueInMatchedTx);
        }

        for (asset, fee) in calc_fee_amount(tx)? {
            let Some(program) = &fee.reward_program else {
                return Err(MovError::RewardProgramIsWrong(format!(
                    "fee of {} {} has no reward output",
                    fee.amount, asset
                )));
            };
            self.config.validate_reward_program(block_height, program)?;
        }
        Ok(())
    }

    /// Fees charged by a matched tx against what the strategy expects for
    /// the orders it spent.
    fn validate_matched_tx_fee(&self, tx: &Tx, orders: &[Order], block_height: u64) -> Result<(), MovError> {
        let settlement = calc_settlement(orders).ok_or(MovError::RequestAmountMath)?;
        let fee_amounts: BTreeMap<AssetId, u64> = calc_fee_amount(tx)?
            .into_iter()
            .map(|(asset, fee)| (asset, fee.amount))
            .collect();
        self.fee_strategy.validate(
            &settlement.receives,
            &settlement.price_diffs,
            &fee_amounts,
            taker_index(orders),
            block_height,
        )?;
        Ok(())
    }

    /// Run the block's transactions through a fresh order book in block
    /// order. Matched txs must spend exactly the best orders of their trade
    /// pairs; with `check_fees` their fees are checked too.
    fn replay_block(&self, block: &Block, check_fees: bool) -> Result<BlockOrders, MovError> {
        let height = block.height();
        let mut book = OrderBook::new(self.store.clone(), Vec::new(), Vec::new());
        let mut orders = BlockOrders::default();

        for (index, tx) in block.transactions.iter().enumerate() {
            if is_matched_tx(tx) {
                let pairs = trade_pairs_from_matched_tx(tx)?;
                validate_trade_pairs(&pairs).map_err(|_| MovError::InvalidTradePairs)?;
                let spent = book.peek_orders(&pairs)?.ok_or(MovError::NotMatchedOrder)?;
                validate_spend_orders(tx, &spent)?;
                if !is_matched(&spent) {
                    return Err(MovError::NotMatchedOrder);
                }
                if check_fees {
                    self.validate_matched_tx_fee(tx, &spent, height)?;
                }
                book.pop_orders(&pairs)?;

                for order in re_orders_from_matched_tx(tx, &spent, height, index as u64)? {
                    book.add_order(order.clone())?;
                    orders.add.push(order);
                }
                orders.delete.extend(spent);
                continue;
            }

            for order in delete_orders_from_tx(tx)? {
                book.del_order(&order);
                orders.delete.push(order);
            }
            for order in add_orders_from_tx(tx, height, index as u64)? {
                book.insert_order(order.clone());
                orders.add.push(order);
            }
        }
        Ok(orders)
    }
}

fn validate_cancel_order_tx(tx: &Tx) -> Result<(), MovError> {
    for input in &tx.inputs {
        if is_p2wmc_program(&input.control_program) && !is_cancel_clause_selector(input) {
            return Err(MovError::ExistTradeInCancelOrderTx);
        }
    }
    Ok(())
}

fn validate_magnetic_contract_args(asset_id: &AssetId, amount: u64, program: &[u8]) -> Result<(), MovError> {
    let args = decode_p2wmc_program(program)?;
    if *asset_id == args.requested_asset {
        return Err(MovError::InvalidTradePairs);
    }
    if args.ratio_numerator <= 0 || args.ratio_denominator <= 0 {
        return Err(MovError::RatioOfTradeLessThanZero);
    }
    match calc_request_amount(amount, args.ratio_numerator as u64, args.ratio_denominator as u64) {
        Some(request) if request >= 1 => Ok(()),
        _ => Err(MovError::RequestAmountMath),
    }
}

/// Inputs of `tx` spend exactly `orders`.
fn validate_spend_orders(tx: &Tx, orders: &[Order]) -> Result<(), MovError> {
    if tx.inputs.len() != orders.len() {
        return Err(MovError::NotMatchedOrder);
    }
    let spent: HashSet<Hash> = tx.inputs.iter().map(|i| i.spent_output_id()).collect();
    if orders.iter().any(|o| !spent.contains(&o.utxo_hash())) {
        return Err(MovError::SpendOutputIdIsIncorrect);
    }
    Ok(())
}

/// Orders re-locked by a matched tx. Each keeps the creation position of
/// the order it came from, found by its asset.
fn re_orders_from_matched_tx(
    tx: &Tx,
    spent: &[Order],
    block_height: u64,
    tx_index: u64,
) -> Result<Vec<Order>, MovError> {
    let mut re_orders = add_orders_from_tx(tx, block_height, tx_index)?;
    for order in &mut re_orders {
        if let Some(origin) = spent.iter().find(|o| o.from_asset_id == order.from_asset_id) {
            order.block_height = origin.block_height;
            order.tx_index = origin.tx_index;
        }
    }
    Ok(re_orders)
}

/// Unordered market of a matched tx, from its first input.
fn market_key(tx: &Tx) -> String {
    match trade_pairs_from_matched_tx(tx).ok().and_then(|pairs| pairs.into_iter().next()) {
        Some(pair) => {
            let reverse = pair.reverse();
            pair.key().min(reverse.key())
        }
        None => String::new(),
    }
}
