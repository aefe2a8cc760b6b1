//! Portable software driver (every platform).
//!
//! Stands in for a GPU on CI/headless machines: surfaces are CPU memory,
//! keyed mutexes are condition variables, and every object is counted so
//! leaks show up as counter drift.

mod driver;
mod surface;

pub use driver::{
    DriverEvent, Fault, ResourceCounters, EVENT_LOG_CAPACITY, SoftwareContext, SoftwareDevice, SoftwareDriver,
    SoftwareSecondary,
};
pub use surface::{SoftwareKeyedMutex, SoftwareTexture, SoftwareView};
