// Adapters layer: concrete implementations of the domain ports for external systems.

pub mod hsdb;
pub mod storage;

pub use hsdb::HsdbClient;
pub use storage::LocalStorage;
