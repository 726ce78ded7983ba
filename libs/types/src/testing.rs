//! Shared fixtures for tests across the workspace
//!
//! Orders are built the same way the chain creates them: as matching-contract
//! outputs of a funding transaction, so their ids, hashes and spends are
//! consistent with replay and store code.

use crate::ids::{AssetId, Hash};
use crate::order::Order;
use crate::program::{encode_p2wmc_program, ContractArgs};
use crate::tx::{BlockHeader, Tx, TxInput, TxOutput};

pub fn btc() -> AssetId {
    AssetId::new([0xb1; 32])
}

pub fn eth() -> AssetId {
    AssetId::new([0xe1; 32])
}

pub fn eos() -> AssetId {
    AssetId::new([0xe2; 32])
}

pub fn etc() -> AssetId {
    AssetId::new([0xe3; 32])
}

/// Plain (non-contract) program owned by participant `tag`.
pub fn seller_program(tag: u8) -> Vec<u8> {
    let mut p = vec![0x00, 0x14];
    p.extend_from_slice(&[tag; 20]);
    p
}

pub fn reward_program() -> Vec<u8> {
    seller_program(0xfe)
}

pub fn contract_program(requested: AssetId, numerator: i64, denominator: i64, seller: u8) -> Vec<u8> {
    let args = ContractArgs {
        requested_asset: requested,
        ratio_numerator: numerator,
        ratio_denominator: denominator,
        seller_program: seller_program(seller),
        seller_key: [seller; 32],
    };
    match encode_p2wmc_program(&args) {
        Ok(p) => p,
        Err(e) => panic!("fixture program: {e}"),
    }
}

/// Parameters of one order output.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub from: AssetId,
    pub to: AssetId,
    pub numerator: i64,
    pub denominator: i64,
    pub amount: u64,
    pub seller: u8,
}

impl OrderSpec {
    pub fn new(from: AssetId, to: AssetId, numerator: i64, denominator: i64, amount: u64, seller: u8) -> Self {
        Self { from, to, numerator, denominator, amount, seller }
    }

    pub fn output(&self) -> TxOutput {
        TxOutput::new(
            self.from,
            self.amount,
            contract_program(self.to, self.numerator, self.denominator, self.seller),
        )
    }
}

/// Transaction funded by a unique input (`seed`) that creates one order per spec.
pub fn order_tx(seed: u64, specs: &[OrderSpec]) -> Tx {
    let funding = TxInput::new(
        Hash::digest(&seed.to_be_bytes()),
        0,
        AssetId::new([0; 32]),
        specs.iter().map(|s| s.amount).sum(),
        seller_program(0),
        vec![],
    );
    Tx::new(vec![funding], specs.iter().map(OrderSpec::output).collect())
}

/// Single order created at (`block_height`, `tx_index`).
pub fn order_at(spec: OrderSpec, seed: u64, block_height: u64, tx_index: u64) -> Order {
    let tx = order_tx(seed, std::slice::from_ref(&spec));
    match Order::from_output(&tx, 0, block_height, tx_index) {
        Ok(o) => o,
        Err(e) => panic!("fixture order: {e}"),
    }
}

/// Single order with priority fields derived from `seed`.
pub fn order(spec: OrderSpec, seed: u64) -> Order {
    order_at(spec, seed, 1, seed)
}

pub fn header(height: u64, previous_block_hash: Hash) -> BlockHeader {
    BlockHeader {
        height,
        previous_block_hash,
        timestamp: height,
    }
}
