//! Library target for the `reelgrab` package.
//!
//! The deliverable is the `reelgrab` binary (`src/main.rs`); its building
//! blocks live here so they can be unit tested.

pub mod cli;
pub mod error;
pub mod input;
pub mod output;

#[doc(hidden)]
pub use reelgrab_engine;
