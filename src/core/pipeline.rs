use crate::config::ProcessingConfig;
use crate::core::{
    Pipeline, ProcessedSpectrum, ProcessingKind, RawSpectrum, SpectraRepository, SpectrumFile,
    SpectrumStatus,
};
use crate::tools::converters::{self, ConvertedFile};
use crate::tools::filetypes::FiletypeRegistry;
use crate::tools::{peaks, thz};
use crate::utils::error::{ProcessorError, Result};
use std::sync::Arc;

/// Fetches a spectrum from HSDB, converts and analyses it, and writes the results back.
pub struct SpectrumPipeline<R: SpectraRepository> {
    repository: Arc<R>,
    registry: FiletypeRegistry,
    config: ProcessingConfig,
}

impl<R: SpectraRepository> SpectrumPipeline<R> {
    pub fn new(repository: Arc<R>, config: ProcessingConfig) -> Result<Self> {
        Ok(Self {
            repository,
            registry: FiletypeRegistry::builtin()?,
            config,
        })
    }

    async fn download(&self, spectrum_id: i64, filename: &str, file_url: &str) -> Result<SpectrumFile> {
        let content = self.repository.download_file(file_url).await?;
        tracing::debug!("Downloaded {} ({} bytes)", filename, content.len());
        Ok(SpectrumFile {
            spectrum_id,
            filename: filename.to_string(),
            content,
        })
    }

    async fn fetch_reference(&self, spectrum_id: i64, raw_sample_id: Option<i64>) -> Result<SpectrumFile> {
        let sample_id = raw_sample_id.ok_or_else(|| ProcessorError::ThzError {
            message: "THz spectrum is not attached to a sample".to_string(),
        })?;
        let reference_id = self
            .repository
            .retrieve_reference_spectrum_id(sample_id, spectrum_id)
            .await?;
        if reference_id == spectrum_id {
            return Err(ProcessorError::ThzError {
                message: format!("spectrum {} cannot be its own reference", spectrum_id),
            });
        }
        let reference = self.repository.get_spectrum(reference_id).await?;
        tracing::info!(
            "📎 Using spectrum {} as THz reference for sample {}",
            reference_id,
            sample_id
        );
        self.download(reference.id, &reference.filename, &reference.file_url)
            .await
    }

    fn convert(&self, category: &str, file: &SpectrumFile) -> Result<ConvertedFile> {
        let filetype = self
            .registry
            .detect(category, &file.filename, &file.content)?;
        converters::convert_to_csv(filetype, &file.content, &file.filename)
    }

    fn transform_peaks(&self, raw: &RawSpectrum) -> Result<ProcessedSpectrum> {
        let converted = self.convert(&raw.spectrum.category, &raw.file)?;
        converters::validate_csv(&converted.content, None)?;

        let (xs, ys) = converters::read_columns(&converted.content)?;
        let metadata = peaks::find_peaks(&xs, &ys, &self.config.peaks).and_then(|peaks| {
            tracing::info!(
                "🔎 Spectrum {}: {} rows, {} peaks",
                raw.spectrum.id,
                converted.rows,
                peaks.len()
            );
            converters::construct_metadata(raw.spectrum.metadata.as_ref(), &peaks)
        });

        Ok(ProcessedSpectrum {
            spectrum_id: raw.spectrum.id,
            kind: ProcessingKind::Peaks,
            filename: converted.filename,
            csv: converted.content,
            metadata,
        })
    }

    fn transform_thz(&self, raw: &RawSpectrum, reference: &SpectrumFile) -> Result<ProcessedSpectrum> {
        let mut metadata = converters::validate_json(raw.spectrum.metadata.as_ref())?;
        let thickness = thz::thickness_from_metadata(&metadata)?;

        let sample_csv = self.convert(&raw.spectrum.category, &raw.file)?;
        let reference_csv = self.convert(&raw.spectrum.category, reference)?;
        let (sample_t, sample_y) = converters::read_columns(&sample_csv.content)?;
        let (reference_t, reference_y) = converters::read_columns(&reference_csv.content)?;

        let constants = thz::extract_optical_constants(
            thz::Trace::new(&reference_t, &reference_y),
            thz::Trace::new(&sample_t, &sample_y),
            thickness,
            &self.config.thz,
        )?;
        tracing::info!(
            "🔎 Spectrum {}: optical constants at {} frequencies",
            raw.spectrum.id,
            constants.len()
        );

        metadata.insert(
            "thz".to_string(),
            serde_json::json!({
                "reference_spectrum_id": reference.spectrum_id,
                "thickness_mm": thickness,
                "points": constants.len(),
            }),
        );

        Ok(ProcessedSpectrum {
            spectrum_id: raw.spectrum.id,
            kind: ProcessingKind::Thz,
            filename: sample_csv.filename,
            csv: constants.to_csv()?,
            metadata: Ok(serde_json::Value::Object(metadata)),
        })
    }
}

#[async_trait::async_trait]
impl<R: SpectraRepository> Pipeline for SpectrumPipeline<R> {
    async fn extract(&self, spectrum_id: i64) -> Result<RawSpectrum> {
        let spectrum = self.repository.get_spectrum(spectrum_id).await?;
        tracing::info!(
            "🚀 Processing spectrum {} ({}, {})",
            spectrum.id,
            spectrum.filename,
            spectrum.category
        );

        if let Err(e) = self.mark(spectrum_id, SpectrumStatus::Ongoing).await {
            tracing::warn!("Could not mark spectrum {} as ongoing: {}", spectrum_id, e);
        }

        let file = self
            .download(spectrum.id, &spectrum.filename, &spectrum.file_url)
            .await?;

        let reference = if spectrum.is_thz() {
            Some(
                self.fetch_reference(spectrum.id, spectrum.sample.as_ref().map(|s| s.id))
                    .await?,
            )
        } else {
            None
        };

        Ok(RawSpectrum {
            spectrum,
            file,
            reference,
        })
    }

    async fn transform(&self, raw: RawSpectrum) -> Result<ProcessedSpectrum> {
        match &raw.reference {
            Some(reference) => self.transform_thz(&raw, reference),
            None => self.transform_peaks(&raw),
        }
    }

    async fn load(&self, processed: ProcessedSpectrum) -> Result<String> {
        let id = processed.spectrum_id;
        tracing::debug!(
            "Uploading {} ({} bytes) to spectrum {}",
            processed.filename,
            processed.csv.len(),
            id
        );

        self.repository
            .patch_with_processed_file(id, &processed.filename, processed.csv)
            .await?;
        let metadata = processed.metadata?;
        self.repository.update_metadata(id, &metadata).await?;
        self.mark(id, SpectrumStatus::Successful).await?;

        Ok(match processed.kind {
            ProcessingKind::Peaks => format!("Done processing for spectrum with id {}", id),
            ProcessingKind::Thz => format!("Done processing for thz spectrum with id {}", id),
        })
    }

    async fn mark(&self, spectrum_id: i64, status: SpectrumStatus) -> Result<()> {
        self.repository.update_status(spectrum_id, status).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::{SampleRef, Spectrum};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory HSDB used by the pipeline and engine tests.
    #[derive(Default)]
    pub(crate) struct MockRepository {
        pub spectra: HashMap<i64, Spectrum>,
        pub files: HashMap<String, Vec<u8>>,
        pub references: HashMap<i64, i64>,
        pub fail_uploads: bool,
        pub statuses: Mutex<Vec<(i64, SpectrumStatus)>>,
        pub uploads: Mutex<Vec<(i64, String, Vec<u8>)>>,
        pub metadata: Mutex<Vec<(i64, serde_json::Value)>>,
    }

    impl MockRepository {
        pub fn with_spectrum(mut self, spectrum: Spectrum, content: &[u8]) -> Self {
            self.files.insert(spectrum.file_url.clone(), content.to_vec());
            self.spectra.insert(spectrum.id, spectrum);
            self
        }

        pub async fn statuses(&self) -> Vec<(i64, SpectrumStatus)> {
            self.statuses.lock().await.clone()
        }
    }

    pub(crate) fn spectrum(id: i64, filename: &str, category: &str) -> Spectrum {
        Spectrum {
            id,
            filename: filename.to_string(),
            file_url: format!("/files/{}", filename),
            format: filename.rsplit_once('.').map(|(_, ext)| ext.to_string()),
            category: category.to_string(),
            status: None,
            range: None,
            sample: Some(SampleRef { id: 1, name: None }),
            metadata: Some(serde_json::json!({"operator": "ab"})),
        }
    }

    #[async_trait::async_trait]
    impl SpectraRepository for MockRepository {
        async fn list_spectra(&self) -> Result<serde_json::Value> {
            Ok(serde_json::to_value(self.spectra.values().collect::<Vec<_>>())?)
        }

        async fn get_spectrum(&self, id: i64) -> Result<Spectrum> {
            self.spectra
                .get(&id)
                .cloned()
                .ok_or(ProcessorError::HsdbResponseError {
                    status: 404,
                    endpoint: format!("/api/v1/spectra/{}", id),
                    body: String::new(),
                })
        }

        async fn download_file(&self, file_url: &str) -> Result<Vec<u8>> {
            self.files
                .get(file_url)
                .cloned()
                .ok_or_else(|| ProcessorError::DownloadError {
                    url: file_url.to_string(),
                    message: "server answered 404 Not Found".to_string(),
                })
        }

        async fn update_status(&self, id: i64, status: SpectrumStatus) -> Result<()> {
            self.statuses.lock().await.push((id, status));
            Ok(())
        }

        async fn patch_with_processed_file(
            &self,
            id: i64,
            filename: &str,
            data: Vec<u8>,
        ) -> Result<()> {
            if self.fail_uploads {
                return Err(ProcessorError::HsdbResponseError {
                    status: 422,
                    endpoint: format!("/api/v1/spectra/{}", id),
                    body: "unprocessable".to_string(),
                });
            }
            self.uploads
                .lock()
                .await
                .push((id, filename.to_string(), data));
            Ok(())
        }

        async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
            self.metadata.lock().await.push((id, metadata.clone()));
            Ok(())
        }

        async fn retrieve_reference_spectrum_id(&self, sample_id: i64, _spectrum_id: i64) -> Result<i64> {
            self.references
                .get(&sample_id)
                .copied()
                .ok_or(ProcessorError::ThzError {
                    message: format!("no reference spectrum found for sample {}", sample_id),
                })
        }
    }

    fn ftir_content() -> Vec<u8> {
        (0..200)
            .map(|i| {
                let x = 4000.0 - i as f64 * 10.0;
                let y = (-(x - 2920.0f64).powi(2) / 800.0).exp();
                format!("{},{}\n", x, y)
            })
            .collect::<String>()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_extract_marks_ongoing_and_downloads() {
        let repository = Arc::new(
            MockRepository::default().with_spectrum(spectrum(5, "icon.0.dpt", "ftir"), &ftir_content()),
        );
        let pipeline = SpectrumPipeline::new(repository.clone(), ProcessingConfig::default()).unwrap();

        let raw = pipeline.extract(5).await.unwrap();
        assert_eq!(raw.file.filename, "icon.0.dpt");
        assert!(raw.reference.is_none());
        assert_eq!(
            repository.statuses().await,
            vec![(5, SpectrumStatus::Ongoing)]
        );
    }

    #[tokio::test]
    async fn test_transform_and_load_peaks() {
        let repository = Arc::new(
            MockRepository::default().with_spectrum(spectrum(5, "icon.0.dpt", "ftir"), &ftir_content()),
        );
        let pipeline = SpectrumPipeline::new(repository.clone(), ProcessingConfig::default()).unwrap();

        let raw = pipeline.extract(5).await.unwrap();
        let processed = pipeline.transform(raw).await.unwrap();
        assert_eq!(processed.filename, "icon.csv");
        assert_eq!(processed.kind, ProcessingKind::Peaks);
        let metadata = processed.metadata.as_ref().unwrap();
        assert_eq!(metadata["operator"], "ab");
        assert_eq!(metadata["peaks"][0]["position"], "2920");

        let message = pipeline.load(processed).await.unwrap();
        assert_eq!(message, "Done processing for spectrum with id 5");
        assert_eq!(repository.uploads.lock().await.len(), 1);
        assert_eq!(
            repository.statuses().await.last(),
            Some(&(5, SpectrumStatus::Successful))
        );
    }

    #[tokio::test]
    async fn test_thz_without_reference_fails_extract() {
        let repository = Arc::new(
            MockRepository::default().with_spectrum(spectrum(8, "slab.txt", "thz"), b"0\t1\n"),
        );
        let pipeline = SpectrumPipeline::new(repository, ProcessingConfig::default()).unwrap();

        let result = pipeline.extract(8).await;
        assert!(matches!(result, Err(ProcessorError::ThzError { .. })));
    }

    #[tokio::test]
    async fn test_thz_spectrum_is_not_its_own_reference() {
        let mut repository =
            MockRepository::default().with_spectrum(spectrum(8, "slab_ref.txt", "thz"), b"0\t1\n");
        repository.references.insert(1, 8);
        let pipeline = SpectrumPipeline::new(Arc::new(repository), ProcessingConfig::default()).unwrap();

        let result = pipeline.extract(8).await;
        assert!(matches!(result, Err(ProcessorError::ThzError { .. })));
    }

    #[tokio::test]
    async fn test_thz_spectrum_is_processed_against_reference() {
        let trace = |delay: f64, scale: f64| -> Vec<u8> {
            (0..400)
                .map(|i| {
                    let t = i as f64 * 0.05;
                    let y = scale * (-(t - 4.0 - delay).powi(2) / 0.08).exp();
                    format!("{}\t{}\n", t, y).replace('.', ",")
                })
                .collect::<String>()
                .into_bytes()
        };

        let mut sample = spectrum(8, "slab.txt", "thz");
        sample.metadata = Some(serde_json::json!({"thickness": 1.0}));
        let mut repository = MockRepository::default()
            .with_spectrum(sample, &trace(1.0 / thz::SPEED_OF_LIGHT, 8.0 / 9.0))
            .with_spectrum(spectrum(9, "reference.txt", "thz"), &trace(0.0, 1.0));
        repository.references.insert(1, 9);
        let repository = Arc::new(repository);
        let pipeline = SpectrumPipeline::new(repository.clone(), ProcessingConfig::default()).unwrap();

        let raw = pipeline.extract(8).await.unwrap();
        assert_eq!(raw.reference.as_ref().map(|r| r.spectrum_id), Some(9));

        let processed = pipeline.transform(raw).await.unwrap();
        assert_eq!(processed.kind, ProcessingKind::Thz);
        assert_eq!(processed.metadata.as_ref().unwrap()["thz"]["reference_spectrum_id"], 9);

        let message = pipeline.load(processed).await.unwrap();
        assert_eq!(message, "Done processing for thz spectrum with id 8");
    }
}
