use ndarray::{Array1, ArrayView1};

/// NaN-aware reductions. Missing samples are NaN and are skipped, never fatal.
pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: ArrayView1<f64>) -> f64 {
        let (sum_sq, count) = samples
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(acc, n), &v| (acc + v * v, n + 1));
        if count == 0 {
            return f64::NAN;
        }
        (sum_sq / count as f64).sqrt()
    }

    pub fn nanmean(samples: ArrayView1<f64>) -> f64 {
        let (sum, count) = samples
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(acc, n), &v| (acc + v, n + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    }

    /// Population variance of the non-NaN samples; NaN with fewer than two.
    pub fn nanvar(samples: ArrayView1<f64>) -> f64 {
        Self::nancov(samples, samples)
    }

    /// Covariance over samples where both inputs are valid, each demeaned by
    /// its own mean over those samples. NaN with fewer than two pairs.
    pub fn nancov(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let pairs = || {
            a.iter()
                .zip(b.iter())
                .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        };
        let (sum_a, sum_b, count) = pairs().fold((0.0, 0.0, 0usize), |(sa, sb, n), (x, y)| {
            (sa + x, sb + y, n + 1)
        });
        if count < 2 {
            return f64::NAN;
        }
        let mean_a = sum_a / count as f64;
        let mean_b = sum_b / count as f64;
        pairs()
            .map(|(x, y)| (x - mean_a) * (y - mean_b))
            .sum::<f64>()
            / count as f64
    }

    pub fn nanmedian(samples: ArrayView1<f64>) -> f64 {
        let mut valid: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
        if valid.is_empty() {
            return f64::NAN;
        }
        valid.sort_by(|a, b| a.total_cmp(b));
        let mid = valid.len() / 2;
        if valid.len() % 2 == 0 {
            (valid[mid - 1] + valid[mid]) / 2.0
        } else {
            valid[mid]
        }
    }

    pub fn cumtrapz(samples: ArrayView1<f64>, dx: f64) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(samples.len());
        for idx in 1..samples.len() {
            out[idx] = out[idx - 1] + 0.5 * dx * (samples[idx] + samples[idx - 1]);
        }
        out
    }

    pub fn trapz(y: impl IntoIterator<Item = f64>, dx: f64) -> f64 {
        let mut iter = y.into_iter();
        let Some(mut prev) = iter.next() else {
            return 0.0;
        };
        let mut total = 0.0;
        for value in iter {
            total += 0.5 * dx * (prev + value);
            prev = value;
        }
        total
    }
}
