//! # seqassign - policy-driven online slot assignment
//!
//! Items arrive one at a time, each with a discrete type, and must be placed
//! immediately and irrevocably into one of `m` single-use slots. Every
//! (type, slot) pair has a known value. A precomputed policy says, for every
//! set of free slots and every type, which slot to use.
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | [`PolicyTable`](types::PolicyTable) (`2^m` rows × types) and [`ValueMatrix`](types::ValueMatrix) |
//! | [`storage`] | Policy artifacts: `.npy`, `.json` and a memory-mapped native format |
//! | [`assigner`] | [`SequentialAssigner`](assigner::SequentialAssigner): free-slot bitmask, per-arrival decisions, drift fallback |
//! | [`matcher`] | Offline optimum by the Hungarian method |
//! | [`episode`] | Caller-side episode context: used items, running total, suggestions |
//! | [`simulation`] | Parallel benchmark of online play against the offline optimum |
//!
//! ## State representation
//!
//! The free slots are a `u32` bitmask; bit `b` set means slot `b` is free.
//! An episode starts at `2^m - 1`, each decision clears one bit, and it ends
//! at 0. The policy row for a state is the mask itself, so a lookup is a
//! single index computation: `mask * type_count + item_type`.

pub mod assigner;
pub mod constants;
pub mod env_config;
pub mod episode;
pub mod error;
pub mod matcher;
pub mod simulation;
pub mod storage;
pub mod types;

pub use assigner::{Assignment, SequentialAssigner};
pub use error::{Error, Result};
pub use types::{PolicyTable, ValueMatrix};
