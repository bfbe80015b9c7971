//! Core data model for harken, a landmark-pair audio search engine.
//!
//! This crate holds the types shared across the workspace: the packed
//! 32-bit [`Address`] hash, the [`Couple`] stored under it, reference
//! [`Recording`] metadata, spectral [`Peak`]s, ranked [`Match`] results,
//! and the [`Error`] enum used by every engine operation.
//!
//! No I/O happens here; see `harken-engine` for the pipeline.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    pack_address, unpack_address, Address, Couple, Match, Peak, Recording, DELTA_BITS, DELTA_MASK,
    FREQ_BITS, FREQ_MASK,
};
