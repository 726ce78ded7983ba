//! Transaction and block primitives consumed by the matching subsystem
//!
//! Only the fields the order logic reads are modelled: spend inputs with
//! their witness arguments, asset outputs, and the header fields used for
//! store consistency checks.

use crate::errors::TypesError;
use crate::ids::{AssetId, FieldHasher, Hash};
use serde::{Deserialize, Serialize};

/// Id of an output, computed from its position and content.
pub fn output_id(
    source_id: &Hash,
    source_pos: u64,
    asset_id: &AssetId,
    amount: u64,
    control_program: &[u8],
) -> Hash {
    FieldHasher::new("output")
        .bytes(source_id.as_bytes())
        .bytes(asset_id.as_bytes())
        .u64(amount)
        .bytes(control_program)
        .u64(source_pos)
        .finish()
}

/// Spend of a previous output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub source_id: Hash,
    pub source_pos: u64,
    pub asset_id: AssetId,
    pub amount: u64,
    pub control_program: Vec<u8>,
    /// Witness arguments; for order spends the last one is the clause selector
    pub arguments: Vec<Vec<u8>>,
}

impl TxInput {
    pub fn new(
        source_id: Hash,
        source_pos: u64,
        asset_id: AssetId,
        amount: u64,
        control_program: Vec<u8>,
        arguments: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            source_id,
            source_pos,
            asset_id,
            amount,
            control_program,
            arguments,
        }
    }

    pub fn spent_output_id(&self) -> Hash {
        output_id(
            &self.source_id,
            self.source_pos,
            &self.asset_id,
            self.amount,
            &self.control_program,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_id: AssetId,
    pub amount: u64,
    pub control_program: Vec<u8>,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, amount: u64, control_program: Vec<u8>) -> Self {
        Self {
            asset_id,
            amount,
            control_program,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tx {
    pub version: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Tx {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
        }
    }

    /// Transaction id. Witness arguments are committed too.
    pub fn id(&self) -> Hash {
        let mut h = FieldHasher::new("tx");
        h.u64(self.version).u64(self.inputs.len() as u64);
        for input in &self.inputs {
            h.bytes(input.spent_output_id().as_bytes())
                .u64(input.arguments.len() as u64);
            for arg in &input.arguments {
                h.bytes(arg);
            }
        }
        h.u64(self.outputs.len() as u64);
        for output in &self.outputs {
            h.bytes(output.asset_id.as_bytes())
                .u64(output.amount)
                .bytes(&output.control_program);
        }
        h.finish()
    }

    /// Id of output `index` of this transaction, if it exists.
    pub fn output_id(&self, index: usize) -> Result<Hash, TypesError> {
        let output = self.outputs.get(index).ok_or(TypesError::IndexOutOfRange {
            index,
            len: self.outputs.len(),
        })?;
        Ok(output_id(
            &self.id(),
            index as u64,
            &output.asset_id,
            output.amount,
            &output.control_program,
        ))
    }

    /// Encoded size in bytes, used for gas costing.
    pub fn serialized_size(&self) -> Result<u64, TypesError> {
        bincode::serialized_size(self).map_err(|e| TypesError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_block_hash: Hash,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        FieldHasher::new("block-header")
            .u64(self.height)
            .bytes(self.previous_block_hash.as_bytes())
            .u64(self.timestamp)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}
