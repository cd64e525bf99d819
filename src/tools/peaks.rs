use crate::config::PeakConfig;
use crate::domain::model::PeakDatum;
use crate::utils::error::{ProcessorError, Result};
use std::cmp::Ordering;

/// A local maximum together with its topological persistence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Persistence {
    pub index: usize,
    pub birth: f64,
    pub persistence: f64,
}

/// Finds peaks in `ys` (sampled at `xs`) ranked by topological persistence.
///
/// Intensities are normalised to their maximum before filtering, so
/// `min_height` is a fraction of the strongest signal.
pub fn find_peaks(xs: &[f64], ys: &[f64], config: &PeakConfig) -> Result<Vec<PeakDatum>> {
    if xs.len() != ys.len() {
        return Err(ProcessorError::PeakDetectionError {
            message: format!("{} positions for {} intensities", xs.len(), ys.len()),
        });
    }

    let max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() || max <= 0.0 {
        return Err(ProcessorError::PeakDetectionError {
            message: "spectrum has no positive intensity".to_string(),
        });
    }

    let normalised: Vec<f64> = ys.iter().map(|y| y / max).collect();
    let signal = if config.denoise {
        bilateral_filter(
            &normalised,
            config.window,
            config.sigma_spatial,
            config.sigma_range,
        )
    } else {
        normalised.clone()
    };

    let mut candidates: Vec<Persistence> = topological_peaks(&signal)
        .into_iter()
        .filter(|p| p.persistence > 0.0)
        .collect();
    candidates.sort_by(|a, b| {
        b.persistence
            .partial_cmp(&a.persistence)
            .unwrap_or(Ordering::Equal)
            .then(b.birth.partial_cmp(&a.birth).unwrap_or(Ordering::Equal))
    });

    let mut peaks: Vec<(f64, PeakDatum)> = candidates
        .iter()
        .take(config.max_rank)
        .filter(|p| normalised[p.index] >= config.min_height)
        .map(|p| {
            (
                xs[p.index],
                PeakDatum {
                    position: xs[p.index],
                    fwhm: full_width_half_maximum(xs, &normalised, p.index),
                },
            )
        })
        .collect();
    peaks.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    tracing::debug!(
        "{} local maxima, {} peaks kept",
        candidates.len(),
        peaks.len()
    );

    Ok(peaks.into_iter().map(|(_, peak)| peak).collect())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// 0-dimensional persistent homology of the superlevel sets of `ys`.
///
/// Every local maximum starts a component; when two components meet, the one
/// with the lower maximum dies and its persistence is `birth - level`. The
/// global maximum never dies and gets `max - min`.
pub fn topological_peaks(ys: &[f64]) -> Vec<Persistence> {
    let n = ys.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| ys[b].partial_cmp(&ys[a]).unwrap_or(Ordering::Equal));

    let mut parent: Vec<usize> = (0..n).collect();
    // index of the maximum owning each root
    let mut peak_of: Vec<usize> = (0..n).collect();
    let mut processed = vec![false; n];
    let mut result = Vec::new();

    for &i in &order {
        processed[i] = true;
        let left = (i > 0 && processed[i - 1]).then(|| find_root(&mut parent, i - 1));
        let right = (i + 1 < n && processed[i + 1]).then(|| find_root(&mut parent, i + 1));

        match (left, right) {
            (None, None) => {
                peak_of[i] = i;
            }
            (Some(root), None) | (None, Some(root)) => {
                parent[i] = root;
            }
            (Some(a), Some(b)) if a == b => {
                parent[i] = a;
            }
            (Some(a), Some(b)) => {
                let (survivor, dying) = if ys[peak_of[a]] >= ys[peak_of[b]] {
                    (a, b)
                } else {
                    (b, a)
                };
                let dying_peak = peak_of[dying];
                result.push(Persistence {
                    index: dying_peak,
                    birth: ys[dying_peak],
                    persistence: ys[dying_peak] - ys[i],
                });
                parent[dying] = survivor;
                parent[i] = survivor;
            }
        }
    }

    let min = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let global = order[0];
    result.push(Persistence {
        index: global,
        birth: ys[global],
        persistence: ys[global] - min,
    });
    result
}

/// Edge-preserving smoothing: neighbours are weighted by distance and by similarity.
pub fn bilateral_filter(ys: &[f64], window: usize, sigma_spatial: f64, sigma_range: f64) -> Vec<f64> {
    if window == 0 || sigma_spatial <= 0.0 || sigma_range <= 0.0 {
        return ys.to_vec();
    }
    let n = ys.len();
    let spatial = 2.0 * sigma_spatial * sigma_spatial;
    let range = 2.0 * sigma_range * sigma_range;

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(window);
            let hi = (i + window).min(n - 1);
            let (mut sum, mut weights) = (0.0, 0.0);
            for j in lo..=hi {
                let d = j as f64 - i as f64;
                let dy = ys[j] - ys[i];
                let w = (-(d * d) / spatial - (dy * dy) / range).exp();
                sum += w * ys[j];
                weights += w;
            }
            sum / weights
        })
        .collect()
}

/// Width at half of the peak height, linearly interpolated on both flanks.
pub fn full_width_half_maximum(xs: &[f64], ys: &[f64], index: usize) -> Option<f64> {
    let half = ys[index] / 2.0;
    let crossing = |a: usize, b: usize| -> f64 {
        if ys[b] == ys[a] {
            xs[a]
        } else {
            xs[a] + (half - ys[a]) * (xs[b] - xs[a]) / (ys[b] - ys[a])
        }
    };

    let left = (0..index)
        .rev()
        .find(|&j| ys[j] <= half)
        .map(|j| crossing(j, j + 1))?;
    let right = (index + 1..ys.len())
        .find(|&j| ys[j] <= half)
        .map(|j| crossing(j, j - 1))?;

    Some((right - left).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(x: f64, center: f64, height: f64, sigma: f64) -> f64 {
        height * (-(x - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    fn two_band_spectrum() -> (Vec<f64>, Vec<f64>) {
        let xs: Vec<f64> = (0..=400).map(|i| i as f64 * 0.1).collect();
        let ys = xs
            .iter()
            .map(|&x| gaussian(x, 10.0, 200.0, 1.0) + gaussian(x, 30.0, 100.0, 2.0))
            .collect();
        (xs, ys)
    }

    fn plain_config() -> PeakConfig {
        PeakConfig {
            denoise: false,
            ..PeakConfig::default()
        }
    }

    #[test]
    fn test_find_two_bands() {
        let (xs, ys) = two_band_spectrum();
        let peaks = find_peaks(&xs, &ys, &plain_config()).unwrap();

        assert_eq!(peaks.len(), 2);
        assert!((peaks[0].position - 10.0).abs() < 1e-9);
        assert!((peaks[1].position - 30.0).abs() < 1e-9);
        // FWHM of a gaussian is 2*sqrt(2 ln 2)*sigma
        let fwhm = peaks[0].fwhm.unwrap();
        assert!((fwhm - 2.3548).abs() < 0.05, "fwhm = {}", fwhm);
    }

    #[test]
    fn test_denoised_positions_are_stable() {
        let (xs, ys) = two_band_spectrum();
        let peaks = find_peaks(&xs, &ys, &PeakConfig::default()).unwrap();
        let positions: Vec<f64> = peaks.iter().map(|p| p.position).collect();
        assert_eq!(positions.len(), 2);
        assert!((positions[0] - 10.0).abs() <= 0.1);
        assert!((positions[1] - 30.0).abs() <= 0.1);
    }

    #[test]
    fn test_rank_limit_keeps_most_persistent() {
        let (xs, ys) = two_band_spectrum();
        let config = PeakConfig {
            max_rank: 1,
            ..plain_config()
        };
        let peaks = find_peaks(&xs, &ys, &config).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].position - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_peaks_below_height_threshold_are_dropped() {
        let xs: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let ys = vec![0.0, 1000.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        let peaks = find_peaks(&xs, &ys, &plain_config()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].position, 1.0);
    }

    #[test]
    fn test_edge_peak_has_no_fwhm() {
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![10.0, 8.0, 2.0, 1.0];
        let peaks = find_peaks(&xs, &ys, &plain_config()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].position, 0.0);
        assert_eq!(peaks[0].fwhm, None);
    }

    #[test]
    fn test_non_positive_spectrum_is_rejected() {
        let result = find_peaks(&[0.0, 1.0], &[0.0, -1.0], &plain_config());
        assert!(matches!(
            result,
            Err(ProcessorError::PeakDetectionError { .. })
        ));
        assert!(find_peaks(&[0.0], &[1.0, 2.0], &plain_config()).is_err());
    }

    #[test]
    fn test_topological_persistence_values() {
        let ys = [0.0, 5.0, 1.0, 3.0, 0.0];
        let mut persistence = topological_peaks(&ys);
        persistence.sort_by_key(|p| p.index);
        assert_eq!(persistence.len(), 2);
        assert_eq!(persistence[0].index, 1);
        assert_eq!(persistence[0].persistence, 5.0);
        assert_eq!(persistence[1].index, 3);
        assert_eq!(persistence[1].persistence, 2.0);
    }

    #[test]
    fn test_bilateral_filter_preserves_constant_signal() {
        let ys = vec![0.5; 10];
        let filtered = bilateral_filter(&ys, 2, 1.0, 0.1);
        assert!(filtered.iter().all(|&y| (y - 0.5).abs() < 1e-12));
    }
}
