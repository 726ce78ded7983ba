//! Block lifecycle through `MovCore`
//!
//! Blocks are built the way a proposer would: ordinary transactions first,
//! then the matched transactions proposed for them.

use matching_engine::{FeeError, MovConfig, MovCore, MovError, RewardProgram, TxVerifyResult};
use persistence::{all_orders, KvMovStore, MemoryKv, MovStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use types::ids::Hash;
use types::order::Order;
use types::program::{cancel_arguments, full_trade_arguments};
use types::testing::{btc, eth, header, order_tx, reward_program, seller_program, OrderSpec};
use types::tx::{Block, Tx, TxOutput};

const START: u64 = 10;

struct Chain {
    core: MovCore,
    blocks: Vec<Block>,
}

impl Chain {
    fn new() -> Self {
        let config = MovConfig {
            start_block_height: START,
            reward_programs: vec![RewardProgram {
                begin_height: 0,
                end_height: 1_000,
                program: hex::encode(reward_program()),
            }],
            ..MovConfig::default()
        };
        let store: Arc<dyn MovStore> = Arc::new(KvMovStore::new(MemoryKv::new()));
        let core = MovCore::new(store, config).unwrap();
        let start = Block {
            header: header(START, Hash::default()),
            transactions: vec![],
        };
        core.apply_block(&start).unwrap();
        Self {
            core,
            blocks: vec![start],
        }
    }

    fn next_block(&self, transactions: Vec<Tx>) -> Block {
        let tip = self.blocks.last().unwrap();
        Block {
            header: header(tip.height() + 1, tip.hash()),
            transactions,
        }
    }

    async fn propose(&self, ordinary: Vec<Tx>) -> Block {
        let draft = self.next_block(ordinary);
        let deadline = Instant::now() + Duration::from_secs(30);
        let matched = self
            .core
            .before_proposal_block(&draft, u64::MAX, deadline)
            .await
            .unwrap();
        let mut transactions = draft.transactions;
        transactions.extend(matched);
        self.next_block(transactions)
    }

    fn validate(&self, block: &Block) -> Result<(), MovError> {
        let results = vec![TxVerifyResult::default(); block.transactions.len()];
        self.core.validate_block(block, &results)
    }

    fn connect(&mut self, block: Block) {
        self.validate(&block).unwrap();
        self.core.apply_block(&block).unwrap();
        self.blocks.push(block);
    }

    fn disconnect(&mut self) {
        let block = self.blocks.pop().unwrap();
        self.core.detach_block(&block).unwrap();
    }

    fn orders(&self) -> Vec<Order> {
        let mut orders = all_orders(self.core.store().clone()).unwrap();
        orders.sort_by_key(|o| o.key());
        orders
    }
}

fn o1_tx() -> Tx {
    order_tx(1, &[OrderSpec::new(btc(), eth(), 50, 1, 10, 1)])
}

fn o2_tx() -> Tx {
    order_tx(2, &[OrderSpec::new(eth(), btc(), 1, 51, 510, 2)])
}

fn o3_tx() -> Tx {
    order_tx(3, &[OrderSpec::new(eth(), btc(), 1, 52, 416, 3)])
}

fn amounts(tx: &Tx) -> Vec<u64> {
    tx.outputs.iter().map(|o| o.amount).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_block_initializes_status() {
    let chain = Chain::new();
    assert_eq!(chain.core.name(), "MOV");
    assert_eq!(chain.core.start_height(), START);
    assert_eq!(chain.core.chain_status().unwrap(), (START, chain.blocks[0].hash()));
    assert!(matches!(
        chain.core.init_chain_status(&Hash::default()),
        Err(MovError::ChainStatusAlreadyInit)
    ));

    let before_start = Block {
        header: header(START - 1, Hash::default()),
        transactions: vec![o1_tx()],
    };
    chain.core.apply_block(&before_start).unwrap();
    assert!(chain.orders().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_match_lifecycle() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    assert_eq!(b11.transactions.len(), 1);
    chain.connect(b11);
    let resting = chain.orders();
    assert_eq!(resting.len(), 1);
    assert_eq!((resting[0].block_height, resting[0].tx_index), (11, 0));

    let b12 = chain.propose(vec![o2_tx()]).await;
    assert_eq!(b12.transactions.len(), 2);
    let matched = &b12.transactions[1];
    // The newest order leads the cycle
    assert_eq!(amounts(matched), vec![9, 499, 1, 11]);
    assert_eq!(matched.outputs[0].control_program, seller_program(2));
    assert_eq!(matched.outputs[1].control_program, seller_program(1));
    assert_eq!(matched.outputs[2].control_program, reward_program());
    assert!(chain.core.is_dust(matched));

    chain.connect(b12);
    assert!(chain.orders().is_empty());
    assert_eq!(chain.core.chain_status().unwrap().0, 12);

    chain.disconnect();
    assert_eq!(chain.orders(), resting);
    chain.disconnect();
    assert!(chain.orders().is_empty());
    assert_eq!(chain.core.chain_status().unwrap(), (START, chain.blocks[0].hash()));

    let start = chain.blocks.pop().unwrap();
    chain.core.detach_block(&start).unwrap();
    assert!(matches!(chain.core.chain_status(), Err(MovError::NotInitChainStatus)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_match_keeps_re_order() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);

    let b12 = chain.propose(vec![o3_tx()]).await;
    let matched = b12.transactions[1].clone();
    assert_eq!(amounts(&matched), vec![7, 415, 2, 1, 1]);
    chain.connect(b12);

    let orders = chain.orders();
    assert_eq!(orders.len(), 1);
    let re_order = &orders[0];
    assert_eq!(re_order.utxo.amount, 2);
    assert_eq!(re_order.utxo.source_id, matched.id());
    assert_eq!((re_order.ratio_numerator, re_order.ratio_denominator), (50, 1));
    assert_eq!((re_order.block_height, re_order.tx_index), (11, 0));

    chain.disconnect();
    let restored = chain.orders();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].utxo.amount, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tampered_fee_is_rejected() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);

    let mut b12 = chain.propose(vec![o2_tx()]).await;
    let matched = &mut b12.transactions[1];
    matched.outputs[1].amount -= 2;
    matched.outputs[3].amount += 2;

    let err = chain.validate(&b12).unwrap_err();
    assert!(matches!(err, MovError::Fee(FeeError::InvalidAmountOfFee { .. })));
    assert!(!err.is_fatal());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_reward_program_is_rejected() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);

    let mut b12 = chain.propose(vec![o2_tx()]).await;
    let matched = &mut b12.transactions[1];
    matched.outputs[2].control_program = seller_program(0x55);
    matched.outputs[3].control_program = seller_program(0x55);

    assert!(matches!(
        chain.validate(&b12),
        Err(MovError::RewardProgramIsWrong(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fee_without_reward_output_is_rejected() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);

    let mut b12 = chain.propose(vec![o2_tx()]).await;
    let matched = &mut b12.transactions[1];
    matched.outputs.truncate(2);
    assert_eq!(amounts(matched), vec![9, 499]);

    assert!(matches!(
        chain.validate(&b12),
        Err(MovError::RewardProgramIsWrong(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_matched_tx_must_spend_best_orders() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);

    let b12 = chain.propose(vec![o2_tx()]).await;
    let better = order_tx(9, &[OrderSpec::new(btc(), eth(), 49, 1, 10, 9)]);
    let mut transactions = b12.transactions.clone();
    transactions.insert(1, better);
    let b12 = Block {
        header: b12.header,
        transactions,
    };
    assert!(matches!(
        chain.validate(&b12),
        Err(MovError::SpendOutputIdIsIncorrect)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_status_is_rejected() {
    let chain = Chain::new();
    let block = chain.next_block(vec![o1_tx()]);
    let results = vec![TxVerifyResult { status_fail: true }];
    assert!(matches!(
        chain.core.validate_block(&block, &results),
        Err(MovError::StatusFailMustFalse)
    ));
    assert!(matches!(
        chain.core.validate_block(&block, &[]),
        Err(MovError::VerifyResultsMismatch { txs: 1, results: 0 })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_order_outputs_are_rejected() {
    let chain = Chain::new();
    let same_asset = order_tx(4, &[OrderSpec::new(btc(), btc(), 1, 1, 10, 4)]);
    let dust = order_tx(5, &[OrderSpec::new(btc(), eth(), 1, 100, 10, 5)]);
    let negative = order_tx(6, &[OrderSpec::new(btc(), eth(), -1, 1, 10, 6)]);
    let verify = TxVerifyResult::default();

    assert!(matches!(
        chain.core.validate_tx(&same_asset, &verify, START + 1),
        Err(MovError::InvalidTradePairs)
    ));
    assert!(matches!(
        chain.core.validate_tx(&dust, &verify, START + 1),
        Err(MovError::RequestAmountMath)
    ));
    assert!(matches!(
        chain.core.validate_tx(&negative, &verify, START + 1),
        Err(MovError::RatioOfTradeLessThanZero)
    ));
    assert!(chain.core.validate_tx(&dust, &verify, START).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_removes_and_detach_restores() {
    let mut chain = Chain::new();
    let b11 = chain.propose(vec![o1_tx()]).await;
    chain.connect(b11);
    let resting = chain.orders();

    let cancel = Tx::new(
        vec![resting[0].spend_input(cancel_arguments(vec![7; 64], &[1; 32]))],
        vec![TxOutput::new(btc(), 10, seller_program(1))],
    );
    assert!(!chain.core.is_dust(&cancel));
    let b12 = chain.propose(vec![cancel]).await;
    assert_eq!(b12.transactions.len(), 1);
    chain.connect(b12);
    assert!(chain.orders().is_empty());

    chain.disconnect();
    assert_eq!(chain.orders(), resting);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixed_clauses_are_rejected() {
    let mut chain = Chain::new();
    let unmatched = order_tx(4, &[OrderSpec::new(eth(), btc(), 1, 49, 490, 4)]);
    let b11 = chain.propose(vec![o1_tx(), unmatched]).await;
    assert_eq!(b11.transactions.len(), 2);
    chain.connect(b11);
    let orders = chain.orders();
    let cancel = |o: &Order| o.spend_input(cancel_arguments(vec![7; 64], &[1; 32]));
    let verify = TxVerifyResult::default();

    let traded = Tx::new(
        vec![cancel(&orders[0]), orders[1].spend_input(full_trade_arguments(0))],
        vec![],
    );
    assert!(matches!(
        chain.core.validate_tx(&traded, &verify, 12),
        Err(MovError::ExistCancelOrderInMatchedTx)
    ));

    let no_clause = Tx::new(vec![cancel(&orders[0]), orders[1].spend_input(vec![])], vec![]);
    assert!(matches!(
        chain.core.validate_tx(&no_clause, &verify, 12),
        Err(MovError::ExistTradeInCancelOrderTx)
    ));
}
