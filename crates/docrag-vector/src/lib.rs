//! In-memory vector corpus and its on-disk snapshots.
//!
//! [`FlatIndex`] does exact squared-L2 search over every stored vector,
//! [`DocumentStore`] holds the chunk records slot for slot, and [`Corpus`]
//! owns both so they can only grow together. [`SnapshotStore`] persists a
//! corpus as generation-stamped files committed by a manifest rename.

#![deny(unused_imports)]

pub mod corpus;
pub mod index;
pub mod snapshot;
pub mod store;

pub use corpus::Corpus;
pub use index::{is_finite, squared_l2, FlatIndex};
pub use snapshot::{EncodedSnapshot, Manifest, SnapshotStore};
pub use store::DocumentStore;
