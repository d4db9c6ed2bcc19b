#![warn(missing_docs)]

//! This crate constitutes a library of light weight helpers that are shared
//! across the partition store crates. Their chief quality is that they have
//! virtually zero dependencies.

mod sync;
pub use sync::*;

mod time;
pub use time::*;

mod unique;
pub use unique::*;
