//! Concurrent matched-transaction collector for block proposal
//!
//! A producer walks the trade pairs (in-flight ones first, then the store)
//! and queues one job per unordered pair. Workers pull jobs, match each
//! pair against its reverse on an isolated order book, and stream results
//! back. The collector keeps accepting results while the gas budget and
//! the deadline allow, then cancels everything and joins the tasks.
//!
//! Every wait races the cancellation token, so a cancelled task never
//! stays parked on a channel or a slow store read. Store reads and
//! matching steps are synchronous and run on the blocking pool; a step
//! abandoned on cancellation only reads the store and its result is
//! dropped.

use crate::book::OrderBook;
use crate::config::MovConfig;
use crate::engine::{matched_tx_gas, Engine};
use crate::errors::MovError;
use crate::fee::FeeStrategy;
use persistence::MovStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{spawn_blocking, JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::order::{Order, TradePair};
use types::tx::Tx;

type MatchResult = Result<Tx, MovError>;

/// Matched transactions accepted within budget and deadline.
#[derive(Debug, Default)]
pub struct Collected {
    pub txs: Vec<Tx>,
    pub gas_used: u64,
    pub timed_out: bool,
}

#[derive(Clone)]
struct Shared {
    store: Arc<dyn MovStore>,
    fee_strategy: Arc<dyn FeeStrategy>,
    reward_program: Vec<u8>,
    arrival_add: Arc<Vec<Order>>,
    arrival_del: Arc<Vec<Order>>,
    cancel: CancellationToken,
}

/// One trade pair and its reverse, matched on their own order book.
struct PairJob {
    engine: Engine,
    pairs: [TradePair; 2],
}

impl PairJob {
    /// Next matched tx of the pair, `None` once nothing clears.
    fn step(&mut self) -> Option<MatchResult> {
        match self.engine.has_matched_tx(&self.pairs) {
            Ok(true) => Some(self.engine.next_matched_tx(&self.pairs).map_err(MovError::from)),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

pub struct MatchCollector {
    shared: Shared,
    worker_num: usize,
    trade_pair_queue_size: usize,
    result_queue_size: usize,
    storage_gas_rate: u64,
    vm_gas_per_input: u64,
}

impl MatchCollector {
    pub fn new(
        store: Arc<dyn MovStore>,
        fee_strategy: Arc<dyn FeeStrategy>,
        reward_program: Vec<u8>,
        arrival_add: Vec<Order>,
        arrival_del: Vec<Order>,
        config: &MovConfig,
    ) -> Self {
        Self {
            shared: Shared {
                store,
                fee_strategy,
                reward_program,
                arrival_add: Arc::new(arrival_add),
                arrival_del: Arc::new(arrival_del),
                cancel: CancellationToken::new(),
            },
            worker_num: config.worker_num.max(1),
            trade_pair_queue_size: config.trade_pair_queue_size.max(1),
            result_queue_size: config.result_queue_size.max(1),
            storage_gas_rate: config.storage_gas_rate,
            vm_gas_per_input: config.vm_gas_per_input,
        }
    }

    /// Collect matched transactions until `gas_left` would be exceeded,
    /// `deadline` passes or no pair matches anymore. Any failure discards
    /// everything collected.
    pub async fn collect(self, gas_left: u64, deadline: Instant) -> Result<Collected, MovError> {
        let (pairs_tx, pairs_rx) = mpsc::channel::<TradePair>(self.trade_pair_queue_size);
        let (results_tx, mut results_rx) = mpsc::channel::<MatchResult>(self.result_queue_size);
        let pairs_rx = Arc::new(Mutex::new(pairs_rx));
        let cancel = self.shared.cancel.clone();

        let mut tasks = JoinSet::new();
        tasks.spawn(produce_trade_pairs(self.shared.clone(), pairs_tx, results_tx.clone()));
        for _ in 0..self.worker_num {
            tasks.spawn(match_trade_pairs(
                self.shared.clone(),
                pairs_rx.clone(),
                results_tx.clone(),
            ));
        }
        drop(results_tx);
        drop(pairs_rx);

        let mut collected = Collected::default();
        let mut remaining = gas_left;
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);
        let outcome = loop {
            if Instant::now() >= deadline {
                collected.timed_out = true;
                debug!(txs = collected.txs.len(), "match collection hit deadline");
                break Ok(());
            }
            tokio::select! {
                biased;
                _ = &mut sleep => {
                    collected.timed_out = true;
                    debug!(txs = collected.txs.len(), "match collection hit deadline");
                    break Ok(());
                }
                result = results_rx.recv() => match result {
                    Some(Ok(tx)) => {
                        let gas = match matched_tx_gas(&tx, self.storage_gas_rate, self.vm_gas_per_input) {
                            Ok(gas) => gas,
                            Err(e) => break Err(MovError::from(e)),
                        };
                        if gas > remaining {
                            debug!(gas, remaining, "gas budget exhausted");
                            break Ok(());
                        }
                        remaining -= gas;
                        collected.gas_used += gas;
                        collected.txs.push(tx);
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },
            }
        };

        cancel.cancel();
        drop(results_rx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "match task failed");
                if outcome.is_ok() {
                    return Err(MovError::Collector(e.to_string()));
                }
            }
        }

        outcome?;
        info!(
            txs = collected.txs.len(),
            gas_used = collected.gas_used,
            timed_out = collected.timed_out,
            "matched txs collected"
        );
        Ok(collected)
    }
}

/// Send `item` unless cancellation comes first. False means stop.
async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Run `f` on the blocking pool. `None` if cancellation comes first.
async fn blocking_or_cancel<T, F>(f: F, cancel: &CancellationToken) -> Option<Result<T, JoinError>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = spawn_blocking(f);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        joined = handle => Some(joined),
    }
}

async fn produce_trade_pairs(
    shared: Shared,
    pairs_tx: mpsc::Sender<TradePair>,
    results_tx: mpsc::Sender<MatchResult>,
) {
    let mut seen = HashSet::new();
    let mut queue = |pair: TradePair| -> Option<TradePair> {
        if pair.from_asset_id == pair.to_asset_id
            || seen.contains(&pair.reverse().key())
            || !seen.insert(pair.key())
        {
            return None;
        }
        Some(pair)
    };

    for order in shared.arrival_add.iter() {
        if let Some(pair) = queue(order.trade_pair()) {
            if !send_or_cancel(&pairs_tx, pair, &shared.cancel).await {
                return;
            }
        }
    }

    let mut after: Option<TradePair> = None;
    loop {
        let store = shared.store.clone();
        let cursor = after.clone();
        let read = move || store.list_trade_pairs(cursor.as_ref());
        let page = match blocking_or_cancel(read, &shared.cancel).await {
            None => return,
            Some(Ok(Ok(page))) => page,
            Some(Ok(Err(e))) => {
                send_or_cancel(&results_tx, Err(e.into()), &shared.cancel).await;
                return;
            }
            Some(Err(e)) => {
                send_or_cancel(&results_tx, Err(MovError::Collector(e.to_string())), &shared.cancel).await;
                return;
            }
        };
        let Some(last) = page.last().cloned() else {
            return;
        };
        for pair in page {
            if let Some(pair) = queue(pair) {
                if !send_or_cancel(&pairs_tx, pair, &shared.cancel).await {
                    return;
                }
            }
        }
        after = Some(last);
    }
}

async fn match_trade_pairs(
    shared: Shared,
    pairs_rx: Arc<Mutex<mpsc::Receiver<TradePair>>>,
    results_tx: mpsc::Sender<MatchResult>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            pair = async { pairs_rx.lock().await.recv().await } => pair,
        };
        let Some(pair) = next else {
            return;
        };

        let pairs = [pair.clone(), pair.reverse()];
        let relevant = |o: &&Order| {
            let p = o.trade_pair();
            p.same_pair(&pairs[0]) || p.same_pair(&pairs[1])
        };
        let book = OrderBook::new(
            shared.store.clone(),
            shared.arrival_add.iter().filter(relevant).cloned().collect(),
            shared.arrival_del.iter().filter(relevant).cloned().collect(),
        );
        let engine = Engine::new(book, shared.fee_strategy.clone(), shared.reward_program.clone());
        let mut job = PairJob { engine, pairs };

        loop {
            let step = move || {
                let result = job.step();
                (job, result)
            };
            let (back, result) = match blocking_or_cancel(step, &shared.cancel).await {
                None => return,
                Some(Ok(stepped)) => stepped,
                Some(Err(e)) => {
                    send_or_cancel(&results_tx, Err(MovError::Collector(e.to_string())), &shared.cancel).await;
                    return;
                }
            };
            job = back;

            let Some(result) = result else {
                break;
            };
            let failed = result.is_err();
            if !send_or_cancel(&results_tx, result, &shared.cancel).await || failed {
                return;
            }
        }
    }
}
