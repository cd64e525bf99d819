pub mod adapters;
pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod tools;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{HsdbClient, LocalStorage};
pub use config::Settings;
pub use core::{engine::ProcessingEngine, pipeline::SpectrumPipeline, queue::TaskQueue};
pub use utils::error::{ProcessorError, Result};
