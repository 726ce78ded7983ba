//! Error types for the order model and program codec

use thiserror::Error;

/// Errors raised while decoding programs, arguments and orders.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Not a matching contract program: {0}")]
    InvalidProgram(String),

    #[error("Seller program too long: {0} bytes")]
    ProgramTooLong(usize),

    #[error("ratio arguments must greater than zero")]
    NonPositiveRatio,

    #[error("Invalid integer argument: {0} bytes")]
    InvalidIntegerArgument(usize),

    #[error("Output {index} is not an order output")]
    NotOrderOutput { index: usize },

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
