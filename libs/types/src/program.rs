//! Matching-contract program codec and spend-argument helpers
//!
//! # Program layout
//! ```text
//! [op: 0x51]
//! [requested_asset: 32 bytes]
//! [ratio_numerator:   i64 BE]
//! [ratio_denominator: i64 BE]
//! [seller_program_len: u16 BE][seller_program: bytes]
//! [seller_key: 32 bytes]
//! ```
//!
//! Spend arguments end with a clause selector encoded as a minimal
//! little-endian integer:
//! - partial trade: `[receive_amount, position, 0]`
//! - full trade: `[position, 1]`
//! - cancel: `[signature, seller_key, 2]`

use crate::errors::TypesError;
use crate::ids::{AssetId, ID_LEN};
use crate::order::{MovUtxo, Order};
use crate::tx::{Tx, TxInput};

/// First byte of every matching-contract program.
pub const P2WMC_OP: u8 = 0x51;

const HEADER_LEN: usize = 1 + ID_LEN + 8 + 8 + 2;

/// Decoded matching-contract arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArgs {
    pub requested_asset: AssetId,
    pub ratio_numerator: i64,
    pub ratio_denominator: i64,
    pub seller_program: Vec<u8>,
    pub seller_key: [u8; ID_LEN],
}

pub fn encode_p2wmc_program(args: &ContractArgs) -> Result<Vec<u8>, TypesError> {
    let seller_len: u16 = args
        .seller_program
        .len()
        .try_into()
        .map_err(|_| TypesError::ProgramTooLong(args.seller_program.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + args.seller_program.len() + ID_LEN);
    out.push(P2WMC_OP);
    out.extend_from_slice(args.requested_asset.as_bytes());
    out.extend_from_slice(&args.ratio_numerator.to_be_bytes());
    out.extend_from_slice(&args.ratio_denominator.to_be_bytes());
    out.extend_from_slice(&seller_len.to_be_bytes());
    out.extend_from_slice(&args.seller_program);
    out.extend_from_slice(&args.seller_key);
    Ok(out)
}

pub fn decode_p2wmc_program(program: &[u8]) -> Result<ContractArgs, TypesError> {
    if program.len() < HEADER_LEN + ID_LEN {
        return Err(TypesError::InvalidProgram(format!(
            "too short: {} bytes",
            program.len()
        )));
    }
    if program[0] != P2WMC_OP {
        return Err(TypesError::InvalidProgram(format!(
            "unexpected op {:#04x}",
            program[0]
        )));
    }

    let requested_asset = AssetId::from_slice(&program[1..1 + ID_LEN])?;
    let mut pos = 1 + ID_LEN;
    let ratio_numerator = read_i64_be(&program[pos..pos + 8]);
    pos += 8;
    let ratio_denominator = read_i64_be(&program[pos..pos + 8]);
    pos += 8;
    let seller_len = u16::from_be_bytes([program[pos], program[pos + 1]]) as usize;
    pos += 2;

    if program.len() != pos + seller_len + ID_LEN {
        return Err(TypesError::InvalidProgram(format!(
            "length mismatch: {} bytes for seller program of {}",
            program.len(),
            seller_len
        )));
    }
    let seller_program = program[pos..pos + seller_len].to_vec();
    pos += seller_len;
    let mut seller_key = [0u8; ID_LEN];
    seller_key.copy_from_slice(&program[pos..]);

    Ok(ContractArgs {
        requested_asset,
        ratio_numerator,
        ratio_denominator,
        seller_program,
        seller_key,
    })
}

pub fn is_p2wmc_program(program: &[u8]) -> bool {
    decode_p2wmc_program(program).is_ok()
}

fn read_i64_be(b: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    i64::from_be_bytes(buf)
}

// ── Spend arguments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseSelector {
    PartialTrade = 0,
    FullTrade = 1,
    Cancel = 2,
}

/// Minimal little-endian encoding; zero encodes as the empty string.
pub fn int64_bytes(n: i64) -> Vec<u8> {
    let mut bytes = (n as u64).to_le_bytes().to_vec();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

pub fn as_int64(b: &[u8]) -> Result<i64, TypesError> {
    if b.len() > 8 {
        return Err(TypesError::InvalidIntegerArgument(b.len()));
    }
    let mut buf = [0u8; 8];
    buf[..b.len()].copy_from_slice(b);
    Ok(i64::from_le_bytes(buf))
}

fn selector_is(arguments: &[Vec<u8>], arity: usize, selector: ClauseSelector) -> bool {
    arguments.len() == arity && arguments[arity - 1] == int64_bytes(selector as i64)
}

pub fn is_partial_trade_clause_selector(input: &TxInput) -> bool {
    selector_is(&input.arguments, 3, ClauseSelector::PartialTrade)
}

pub fn is_full_trade_clause_selector(input: &TxInput) -> bool {
    selector_is(&input.arguments, 2, ClauseSelector::FullTrade)
}

pub fn is_trade_clause_selector(input: &TxInput) -> bool {
    is_partial_trade_clause_selector(input) || is_full_trade_clause_selector(input)
}

pub fn is_cancel_clause_selector(input: &TxInput) -> bool {
    selector_is(&input.arguments, 3, ClauseSelector::Cancel)
}

pub fn partial_trade_arguments(receive_amount: u64, position: u64) -> Vec<Vec<u8>> {
    vec![
        int64_bytes(receive_amount as i64),
        int64_bytes(position as i64),
        int64_bytes(ClauseSelector::PartialTrade as i64),
    ]
}

pub fn full_trade_arguments(position: u64) -> Vec<Vec<u8>> {
    vec![
        int64_bytes(position as i64),
        int64_bytes(ClauseSelector::FullTrade as i64),
    ]
}

pub fn cancel_arguments(signature: Vec<u8>, seller_key: &[u8; ID_LEN]) -> Vec<Vec<u8>> {
    vec![
        signature,
        seller_key.to_vec(),
        int64_bytes(ClauseSelector::Cancel as i64),
    ]
}

// ── Order extraction ────────────────────────────────────────────────

fn positive_ratio(args: &ContractArgs) -> Result<(u64, u64), TypesError> {
    if args.ratio_numerator <= 0 || args.ratio_denominator <= 0 {
        return Err(TypesError::NonPositiveRatio);
    }
    Ok((args.ratio_numerator as u64, args.ratio_denominator as u64))
}

impl Order {
    /// Order created by output `index` of `tx`, which sits at `tx_index`
    /// of the block at `block_height`.
    pub fn from_output(
        tx: &Tx,
        index: usize,
        block_height: u64,
        tx_index: u64,
    ) -> Result<Self, TypesError> {
        let output = tx.outputs.get(index).ok_or(TypesError::IndexOutOfRange {
            index,
            len: tx.outputs.len(),
        })?;
        let args = decode_p2wmc_program(&output.control_program)
            .map_err(|_| TypesError::NotOrderOutput { index })?;
        let (ratio_numerator, ratio_denominator) = positive_ratio(&args)?;

        Ok(Order {
            from_asset_id: output.asset_id,
            to_asset_id: args.requested_asset,
            utxo: MovUtxo {
                source_id: tx.id(),
                source_pos: index as u64,
                amount: output.amount,
                control_program: output.control_program.clone(),
            },
            ratio_numerator,
            ratio_denominator,
            beneficiary_program: args.seller_program,
            block_height,
            tx_index,
        })
    }

    /// Order spent by input `index` of `tx`. Creation position is not
    /// recoverable from the spend and is left at zero.
    pub fn from_input(tx: &Tx, index: usize) -> Result<Self, TypesError> {
        let input = tx.inputs.get(index).ok_or(TypesError::IndexOutOfRange {
            index,
            len: tx.inputs.len(),
        })?;
        let args = decode_p2wmc_program(&input.control_program)?;
        let (ratio_numerator, ratio_denominator) = positive_ratio(&args)?;

        Ok(Order {
            from_asset_id: input.asset_id,
            to_asset_id: args.requested_asset,
            utxo: MovUtxo {
                source_id: input.source_id,
                source_pos: input.source_pos,
                amount: input.amount,
                control_program: input.control_program.clone(),
            },
            ratio_numerator,
            ratio_denominator,
            beneficiary_program: args.seller_program,
            block_height: 0,
            tx_index: 0,
        })
    }

    /// Input spending this order with the given witness arguments.
    pub fn spend_input(&self, arguments: Vec<Vec<u8>>) -> TxInput {
        TxInput::new(
            self.utxo.source_id,
            self.utxo.source_pos,
            self.from_asset_id,
            self.utxo.amount,
            self.utxo.control_program.clone(),
            arguments,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxOutput;

    fn args() -> ContractArgs {
        ContractArgs {
            requested_asset: AssetId::new([7; 32]),
            ratio_numerator: 50,
            ratio_denominator: 1,
            seller_program: vec![0x00, 0x14, 0xaa],
            seller_key: [9; 32],
        }
    }

    #[test]
    fn test_program_roundtrip() {
        let program = encode_p2wmc_program(&args()).unwrap();
        assert!(is_p2wmc_program(&program));
        assert_eq!(decode_p2wmc_program(&program).unwrap(), args());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut program = encode_p2wmc_program(&args()).unwrap();
        program.push(0);
        assert!(!is_p2wmc_program(&program));
    }

    #[test]
    fn test_decode_rejects_wrong_op() {
        let mut program = encode_p2wmc_program(&args()).unwrap();
        program[0] = 0x00;
        assert!(matches!(
            decode_p2wmc_program(&program),
            Err(TypesError::InvalidProgram(_))
        ));
    }

    #[test]
    fn test_int64_bytes_minimal() {
        assert!(int64_bytes(0).is_empty());
        assert_eq!(int64_bytes(1), vec![1]);
        assert_eq!(int64_bytes(256), vec![0, 1]);
        assert_eq!(as_int64(&int64_bytes(123_456)).unwrap(), 123_456);
        assert_eq!(as_int64(&[]).unwrap(), 0);
        assert!(as_int64(&[0; 9]).is_err());
    }

    #[test]
    fn test_clause_selectors() {
        let mut input = TxInput::new(
            Default::default(),
            0,
            AssetId::new([1; 32]),
            10,
            vec![],
            partial_trade_arguments(5, 0),
        );
        assert!(is_partial_trade_clause_selector(&input));
        assert!(is_trade_clause_selector(&input));
        assert!(!is_cancel_clause_selector(&input));

        input.arguments = full_trade_arguments(3);
        assert!(is_full_trade_clause_selector(&input));
        assert!(!is_partial_trade_clause_selector(&input));

        input.arguments = cancel_arguments(vec![1, 2, 3], &[0; 32]);
        assert!(is_cancel_clause_selector(&input));
        assert!(!is_trade_clause_selector(&input));
    }

    #[test]
    fn test_order_from_output_and_input() {
        let program = encode_p2wmc_program(&args()).unwrap();
        let tx = Tx::new(vec![], vec![TxOutput::new(AssetId::new([1; 32]), 10, program)]);
        let order = Order::from_output(&tx, 0, 5, 2).unwrap();
        assert_eq!(order.to_asset_id, AssetId::new([7; 32]));
        assert_eq!(order.beneficiary_program, vec![0x00, 0x14, 0xaa]);
        assert_eq!(order.utxo.source_id, tx.id());

        let spend = Tx::new(vec![order.spend_input(full_trade_arguments(0))], vec![]);
        let spent = Order::from_input(&spend, 0).unwrap();
        assert_eq!(spent.key(), order.key());
        assert_eq!(spent.utxo_hash(), order.utxo_hash());
        assert_eq!(spend.inputs[0].spent_output_id(), tx.output_id(0).unwrap());
    }

    #[test]
    fn test_order_from_output_rejects_non_positive_ratio() {
        let mut a = args();
        a.ratio_denominator = 0;
        let program = encode_p2wmc_program(&a).unwrap();
        let tx = Tx::new(vec![], vec![TxOutput::new(AssetId::new([1; 32]), 10, program)]);
        assert_eq!(Order::from_output(&tx, 0, 1, 0), Err(TypesError::NonPositiveRatio));
    }

    #[test]
    fn test_order_from_plain_output_fails() {
        let tx = Tx::new(vec![], vec![TxOutput::new(AssetId::new([1; 32]), 10, vec![0x00])]);
        assert_eq!(
            Order::from_output(&tx, 0, 1, 0),
            Err(TypesError::NotOrderOutput { index: 0 })
        );
    }
}
