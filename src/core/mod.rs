pub mod convert;
pub mod engine;
pub mod pipeline;
pub mod queue;

pub use crate::domain::model::{
    ProcessedSpectrum, ProcessingKind, ProcessingMessage, ProcessingRequest, RawSpectrum,
    SpectrumFile, SpectrumStatus,
};
pub use crate::domain::ports::{Pipeline, Processor, SpectraRepository, Storage};
pub use crate::utils::error::Result;
