//! Log backend - whole-collection blobs in a key-value register
//!
//! Each collection lives under one register key as a JSON array of
//! entities. Every mutation reads the whole array, changes it in memory and
//! writes the whole array back.

pub mod engine;
pub mod register;

pub use engine::LogEngine;
pub use register::{FileRegister, MemoryRegister, Register};
