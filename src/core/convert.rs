use crate::config::PeakConfig;
use crate::core::Storage;
use crate::tools::converters::{self, ConvertedFile};
use crate::tools::filetypes::{self, FiletypeRegistry};
use crate::tools::peaks;
use crate::utils::error::{ProcessorError, Result};

pub const PEAKS_FILENAME: &str = "peaks.json";

#[derive(Debug, Clone)]
pub struct LocalConversion {
    pub filetype: &'static str,
    pub csv: ConvertedFile,
    /// Present when peak detection was requested.
    pub peaks: Option<serde_json::Value>,
}

/// Converts a raw instrument file and writes the CSV (and optionally the peaks) to `storage`.
///
/// Without an explicit `filetype` key the format is sniffed from the content.
pub async fn convert_file<S: Storage>(
    storage: &S,
    registry: &FiletypeRegistry,
    filename: &str,
    content: &[u8],
    filetype: Option<&str>,
    peak_config: Option<&PeakConfig>,
) -> Result<LocalConversion> {
    let filetype = match filetype {
        Some(key) => registry.get(key).ok_or_else(|| {
            let known: Vec<&str> = registry.keys().collect();
            tracing::warn!("Known filetypes: {}", known.join(", "));
            ProcessorError::UnsupportedFiletypeError {
                filetype: key.to_string(),
            }
        })?,
        None => registry
            .sniff(content)
            .ok_or_else(|| ProcessorError::UnsupportedFiletypeError {
                filetype: filetypes::extension(filename),
            })?,
    };
    tracing::info!("📄 Converting {} as {}", filename, filetype.key);

    let csv = converters::convert_to_csv(filetype, content, filename)?;
    storage.write_file(&csv.filename, &csv.content).await?;

    let peaks = match peak_config {
        Some(config) => {
            converters::validate_csv(&csv.content, None)?;
            let (xs, ys) = converters::read_columns(&csv.content)?;
            let found = peaks::find_peaks(&xs, &ys, config)?;
            let metadata = converters::construct_metadata(None, &found)?;
            storage
                .write_file(PEAKS_FILENAME, &serde_json::to_vec_pretty(&metadata)?)
                .await?;
            Some(metadata)
        }
        None => None,
    };

    Ok(LocalConversion {
        filetype: filetype.key,
        csv,
        peaks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use tempfile::TempDir;

    const RAMAN: &[u8] = b"100.0\t1.0\n101.0\t3.0\n102.0\t9.0\n103.0\t3.0\n104.0\t1.0\n";

    #[tokio::test]
    async fn test_convert_with_sniffing_and_peaks() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        let registry = FiletypeRegistry::builtin().unwrap();

        let result = convert_file(
            &storage,
            &registry,
            "spot.txt",
            RAMAN,
            None,
            Some(&PeakConfig::default()),
        )
        .await
        .unwrap();

        assert_eq!(result.filetype, "raman.txt");
        assert_eq!(result.csv.rows, 5);
        assert_eq!(result.peaks.unwrap()["peaks"][0]["position"], "102");

        let csv = std::fs::read_to_string(temp_dir.path().join("spot.csv")).unwrap();
        assert!(csv.starts_with("100.0,1.0\n"));
        assert!(temp_dir.path().join(PEAKS_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_unknown_filetype_key_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        let registry = FiletypeRegistry::builtin().unwrap();

        let result = convert_file(&storage, &registry, "a.bin", RAMAN, Some("nmr.fid"), None).await;
        assert!(matches!(
            result,
            Err(ProcessorError::UnsupportedFiletypeError { ref filetype }) if filetype == "nmr.fid"
        ));
        assert!(std::fs::read_dir(temp_dir.path()).unwrap().next().is_none());
    }
}
