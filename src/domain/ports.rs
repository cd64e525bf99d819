use crate::domain::model::{
    ProcessedSpectrum, ProcessingMessage, ProcessingRequest, RawSpectrum, Spectrum,
    SpectrumStatus,
};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Remote spectra store (HSDB).
#[async_trait]
pub trait SpectraRepository: Send + Sync {
    async fn list_spectra(&self) -> Result<serde_json::Value>;
    async fn get_spectrum(&self, id: i64) -> Result<Spectrum>;
    async fn download_file(&self, file_url: &str) -> Result<Vec<u8>>;
    async fn update_status(&self, id: i64, status: SpectrumStatus) -> Result<()>;
    async fn patch_with_processed_file(&self, id: i64, filename: &str, data: Vec<u8>)
        -> Result<()>;
    async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()>;
    /// Reference measurement of `sample_id`, never `spectrum_id` itself.
    async fn retrieve_reference_spectrum_id(&self, sample_id: i64, spectrum_id: i64)
        -> Result<i64>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self, spectrum_id: i64) -> Result<RawSpectrum>;
    async fn transform(&self, raw: RawSpectrum) -> Result<ProcessedSpectrum>;
    async fn load(&self, processed: ProcessedSpectrum) -> Result<String>;
    async fn mark(&self, spectrum_id: i64, status: SpectrumStatus) -> Result<()>;
}

/// Unit of work executed by the task queue workers.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, request: &ProcessingRequest) -> Result<ProcessingMessage>;
}
