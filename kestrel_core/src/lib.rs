//! # Kestrel Core
//!
//! Core types and primitives shared by the Kestrel JIT crates.
//!
//! - **Error Handling**: the bailout error enum every compiler phase returns
//! - **Bit Sets**: dense bit vectors used for dataflow sets

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bitmap;
pub mod error;

pub use bitmap::{BitMap, BitMap2D};
pub use error::{CompileError, CompileResult, UndefinedOperand};

/// Kestrel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
