//! Target description consumed by the register allocator.

pub mod registers;

pub use registers::{Register, RegisterClass, RegisterConfig, RegisterSet};
