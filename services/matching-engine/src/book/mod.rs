//! Order book over persisted and in-flight orders

pub mod order_book;

pub use order_book::OrderBook;
