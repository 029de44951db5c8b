//! Virtual memory model for a cycle-driven hardware simulator.
//!
//! Translates simulated virtual addresses into simulated physical ones,
//! allocating frames on first touch and charging a fixed minor fault penalty
//! to the caller's timing model.

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod mm;

pub use config::VmemConfig;
pub use device::{MemoryDevice, SimDram};
pub use error::VmemError;
pub use mm::{CpuId, PhysAddr, VirtAddr, VirtualMemory};
