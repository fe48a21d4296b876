//! Mycelia Aggregator
//!
//! Per-asset aggregation engines: fan out to the domain's feed set under
//! one wall-clock deadline, reduce deterministically (median, pooled VWAP,
//! cross-rate, hybrid), enforce quorum and the stablecoin-tier coherence
//! gate, and emit a signable [`Assertion`].

pub mod assertion;
pub mod engine;
pub mod stats;

pub use assertion::{Assertion, CanonicalError, Method, NonceSeq};
pub use engine::{Engine, EngineKind, TieredPolicy, VwapPolicy};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("insufficient quorum: {got} of {need} sources")]
    InsufficientQuorum { got: usize, need: usize },
    #[error("insufficient trades: {trades} trades from {sources} sources")]
    InsufficientTrades { trades: usize, sources: usize },
    #[error("degenerate aggregate: {0}")]
    Degenerate(String),
}
