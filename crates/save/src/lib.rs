//! Checkpointing of the simulation state at day boundaries.
//!
//! The engine itself persists nothing; this crate serialises the soil
//! column, snow/frost state, cumulative counters and the planted crop into
//! a compact checkpoint file and restores them into a fresh set of
//! resources.

pub mod checkpoint;
pub mod file_header;

pub use checkpoint::{
    capture, encode_checkpoint, decode_checkpoint, restore_column, restore_crop, CheckpointData,
};
