use crate::core::{Pipeline, ProcessingMessage, ProcessingRequest, Processor, SpectrumStatus};
use crate::utils::error::{ProcessorError, Result};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Extract,
    Transform,
    Load,
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: ProcessorError,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(ProcessorError) -> Self {
        move |error| Self { stage, error }
    }

    /// Message reported back to the caller for a failed run.
    fn message(&self, spectrum_id: i64) -> String {
        match (self.stage, &self.error) {
            (_, ProcessorError::DownloadError { .. }) => {
                "Error getting spectrum file from server".to_string()
            }
            (_, ProcessorError::UnsupportedFiletypeError { .. }) => {
                format!("Unsupported filetype for spectrum with id {}", spectrum_id)
            }
            (Stage::Extract, _) => format!("Error retrieving spectrum with id {}", spectrum_id),
            (
                Stage::Transform,
                ProcessorError::PeakDetectionError { .. }
                | ProcessorError::InvalidMetadataError { .. },
            )
            | (Stage::Load, _) => format!(
                "Error uploading processing data to spectrum with id {}",
                spectrum_id
            ),
            (Stage::Transform, _) => format!("Error converting spectrum with id {}", spectrum_id),
        }
    }
}

/// Drives a [`Pipeline`] through extract, transform and load for one spectrum.
pub struct ProcessingEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> ProcessingEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    /// Processes one spectrum.
    ///
    /// Failures are reported as `Ok` with an error message and the spectrum is
    /// marked `error`. Transient upstream failures are returned as `Err` so the
    /// queue can retry them.
    pub async fn run(&self, request: &ProcessingRequest) -> Result<ProcessingMessage> {
        let started = Instant::now();
        let id = request.spectrum_id;

        let mut message = match self.execute(id).await {
            Ok(done) => ProcessingMessage::done(done),
            Err(failure) => {
                tracing::error!(
                    "❌ Processing spectrum {} failed during {:?}: {} (Category: {:?}, Severity: {:?})",
                    id,
                    failure.stage,
                    failure.error,
                    failure.error.category(),
                    failure.error.severity()
                );
                if let Err(e) = self.pipeline.mark(id, SpectrumStatus::Error).await {
                    tracing::warn!("Could not mark spectrum {} as error: {}", id, e);
                }
                if failure.error.is_retryable() {
                    return Err(failure.error);
                }
                ProcessingMessage::error(failure.message(id))
            }
        };

        message.execution_time = Some(started.elapsed().as_secs_f64());
        notify(id, &message);
        Ok(message)
    }

    async fn execute(&self, id: i64) -> std::result::Result<String, StageFailure> {
        tracing::debug!("Extracting spectrum {}", id);
        let raw = self
            .pipeline
            .extract(id)
            .await
            .map_err(StageFailure::at(Stage::Extract))?;

        tracing::debug!("Transforming spectrum {}", id);
        let processed = self
            .pipeline
            .transform(raw)
            .await
            .map_err(StageFailure::at(Stage::Transform))?;

        tracing::debug!("Loading spectrum {}", id);
        self.pipeline
            .load(processed)
            .await
            .map_err(StageFailure::at(Stage::Load))
    }
}

#[async_trait::async_trait]
impl<P: Pipeline> Processor for ProcessingEngine<P> {
    async fn process(&self, request: &ProcessingRequest) -> Result<ProcessingMessage> {
        self.run(request).await
    }
}

/// Emits the processing notification event for a finished run.
fn notify(spectrum_id: i64, message: &ProcessingMessage) {
    if message.is_error() {
        tracing::warn!(
            target: "spectral_processor::notify",
            spectrum_id,
            status = ?message.status,
            execution_time = message.execution_time,
            "{}",
            message.message
        );
    } else {
        tracing::info!(
            target: "spectral_processor::notify",
            spectrum_id,
            status = ?message.status,
            execution_time = message.execution_time,
            "✅ {}",
            message.message
        );
    }
}
