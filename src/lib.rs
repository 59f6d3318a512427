//! This crate addresses, splits, consolidates and rechunks labeled multi-dimensional datasets
//! in map-reduce style pipelines.
//!
//! A large dataset is processed as a collection of records, each a [Key](key::Key) giving the
//! position of a chunk in the full dataset paired with the chunk itself. Transforms split
//! records into smaller ones and group records by key to consolidate them into larger ones.
//! [Rechunk](rechunk::Rechunk) converts a collection from one chunk scheme to another through
//! a sequence of such stages, planned so that no task holds more than a memory budget.
//!
//! The crate is built on top of a number of open source components.
//!
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays for chunk data.
//! * [Rayon](rayon) executes transforms in parallel on a thread pool.
//! * [Serde](serde) performs (de)serialisation of keys, plans and configuration.
//! * [Clap](clap) parses the command line of the `chunkbeam` binary.

pub mod app;
pub mod array;
pub mod cli;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod key;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod rechunk;
pub mod source;
pub mod split;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod transform;
pub mod transforms;
