//! Shared building blocks for the recorder and anything that reads its
//! output: configuration, the block clock, retention arithmetic and the
//! on-disk index layout.

pub mod block;
pub mod config;
pub mod index;
pub mod protocol;
pub mod retention;
