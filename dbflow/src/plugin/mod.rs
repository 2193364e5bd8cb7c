//! Capability interfaces to external collaborators.
//!
//! ## Architecture
//!
//! - **Driver** / **DriverFactory**: per-engine adapter for sync, dump and execute
//! - **ObjectStorage**: remote destination for backup artifacts
//! - **Advisor**: SQL review run before a migration is executed
//!
//! dbflow ships no implementations. Embedding applications provide them
//! through [`crate::Capabilities`].

mod advisor;
mod driver;
mod storage;

pub use advisor::{Advice, AdviceStatus, Advisor};
pub use driver::{
    DatabaseSchemaMetadata, Driver, DriverFactory, InstanceMetadata, SchemaMetadata,
};
pub use storage::ObjectStorage;
