// # Registry Store Implementations
//
// This module provides implementations of the RegistryStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileRegistryStore;
pub use memory::MemoryRegistryStore;
