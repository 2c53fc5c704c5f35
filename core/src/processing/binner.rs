use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult};

/// Number of complete bins; trailing samples that do not fill a bin are dropped.
pub fn bin_count(n_samples: usize, n_bin: usize) -> usize {
    if n_bin == 0 {
        0
    } else {
        n_samples / n_bin
    }
}

/// Per-component velocity noise (m/s) of a Janus head with beam noise
/// `beam_noise` (m/s) and beam angle `beam_angle_deg`.
pub fn noise_from_beam_geometry(beam_noise: f64, beam_angle_deg: f64) -> [f64; 3] {
    let theta = beam_angle_deg.to_radians();
    let horizontal = beam_noise / (std::f64::consts::SQRT_2 * theta.sin());
    let vertical = beam_noise / (2.0 * theta.cos());
    [horizontal, horizontal, vertical]
}

/// Subtract `noise^2` from each component row of a variance array.
///
/// Negative results are left as they are unless `clamp` is set.
pub fn subtract_noise(variance: &mut Array2<f64>, noise: &[f64], clamp: bool) {
    for (mut row, &sigma) in variance.axis_iter_mut(Axis(0)).zip(noise.iter()) {
        row.mapv_inplace(|v| {
            let reduced = v - sigma * sigma;
            if clamp && reduced < 0.0 {
                0.0
            } else {
                reduced
            }
        });
    }
}

/// Splits a time series into back-to-back ensembles and reduces each one.
#[derive(Debug, Clone)]
pub struct Binner {
    n_bin: usize,
    fs: f64,
}

impl Binner {
    pub fn new(n_bin: usize, fs: f64) -> CoreResult<Self> {
        if n_bin == 0 {
            return Err(CoreError::InvalidInput("n_bin must be positive".into()));
        }
        if !(fs > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "sample rate must be positive, got {}",
                fs
            )));
        }
        Ok(Self { n_bin, fs })
    }

    pub fn n_bin(&self) -> usize {
        self.n_bin
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn bin_count(&self, n_samples: usize) -> usize {
        bin_count(n_samples, self.n_bin)
    }

    /// `[n_bins, n_bin + n_pad]` view of a series.
    ///
    /// Each bin borrows `n_pad / 2` samples from the previous bin and the rest
    /// of `n_pad` from the next one; positions outside the binned span are zero.
    pub fn reshape(&self, arr: ArrayView1<f64>, n_pad: usize) -> Array2<f64> {
        let n_bins = self.bin_count(arr.len());
        let used = n_bins * self.n_bin;
        let lead = n_pad / 2;
        let width = self.n_bin + n_pad;
        Array2::from_shape_fn((n_bins, width), |(bin, j)| {
            let idx = (bin * self.n_bin + j) as isize - lead as isize;
            if idx >= 0 && (idx as usize) < used {
                arr[idx as usize]
            } else {
                0.0
            }
        })
    }

    /// [`Binner::reshape`] applied to every row of a `[C, N]` array.
    pub fn reshape_channels(&self, arr: ArrayView2<f64>, n_pad: usize) -> Array3<f64> {
        let n_bins = self.bin_count(arr.ncols());
        let mut out = Array3::<f64>::zeros((arr.nrows(), n_bins, self.n_bin + n_pad));
        for (channel, row) in arr.axis_iter(Axis(0)).enumerate() {
            out.slice_mut(s![channel, .., ..])
                .assign(&self.reshape(row, n_pad));
        }
        out
    }

    /// NaN-aware bin means of a single series.
    pub fn mean(&self, arr: ArrayView1<f64>) -> Array1<f64> {
        self.reshape(arr, 0)
            .axis_iter(Axis(0))
            .map(StatsHelper::nanmean)
            .collect()
    }

    /// NaN-aware bin means, `[C, n_bins]`.
    pub fn do_avg(&self, arr: ArrayView2<f64>) -> Array2<f64> {
        self.per_channel(arr, |binner, row| binner.mean(row))
    }

    /// NaN-aware bin variances, `[C, n_bins]`; each bin is demeaned by its own mean.
    pub fn do_var(&self, arr: ArrayView2<f64>) -> Array2<f64> {
        self.per_channel(arr, |binner, row| binner.calc_covariance(row, row))
    }

    /// NaN-aware covariance of two series within each bin.
    pub fn calc_covariance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64> {
        let a = self.reshape(a, 0);
        let b = self.reshape(b, 0);
        a.axis_iter(Axis(0))
            .zip(b.axis_iter(Axis(0)))
            .map(|(x, y)| StatsHelper::nancov(x, y))
            .collect()
    }

    /// Velocity variances `u'u'`, `v'v'`, `w'w'` with Doppler noise removed.
    pub fn calc_tke(
        &self,
        vel: ArrayView2<f64>,
        noise: Option<[f64; 3]>,
        clamp: bool,
    ) -> CoreResult<Array2<f64>> {
        check_velocity(&vel)?;
        let mut tke = self.do_var(vel.slice(s![0..3, ..]));
        if let Some(noise) = noise {
            subtract_noise(&mut tke, &noise, clamp);
        }
        Ok(tke)
    }

    /// Reynolds stresses `u'w'`, `v'w'`, `u'v'`.
    pub fn calc_stress(&self, vel: ArrayView2<f64>) -> CoreResult<Array2<f64>> {
        check_velocity(&vel)?;
        let n_bins = self.bin_count(vel.ncols());
        let mut out = Array2::<f64>::zeros((3, n_bins));
        for (row, (i, j)) in [(0, 2), (1, 2), (0, 1)].into_iter().enumerate() {
            out.row_mut(row)
                .assign(&self.calc_covariance(vel.row(i), vel.row(j)));
        }
        Ok(out)
    }

    /// Mean time of each bin.
    pub fn bin_times(&self, time: ArrayView1<f64>) -> Array1<f64> {
        self.mean(time)
    }

    fn per_channel<F>(&self, arr: ArrayView2<f64>, reduce: F) -> Array2<f64>
    where
        F: Fn(&Self, ArrayView1<f64>) -> Array1<f64>,
    {
        let n_bins = self.bin_count(arr.ncols());
        let mut out = Array2::<f64>::zeros((arr.nrows(), n_bins));
        for (channel, row) in arr.axis_iter(Axis(0)).enumerate() {
            out.row_mut(channel).assign(&reduce(self, row));
        }
        out
    }
}

fn check_velocity(vel: &ArrayView2<f64>) -> CoreResult<()> {
    if vel.nrows() < 3 {
        return Err(CoreError::InvalidInput(format!(
            "velocity needs 3 components, got {}",
            vel.nrows()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array1};

    fn ramp(n: usize) -> Array1<f64> {
        Array1::from_iter((1..=n).map(|v| v as f64))
    }

    #[test]
    fn reshape_splits_into_back_to_back_bins() {
        let binner = Binner::new(10, 1.0).unwrap();
        let out = binner.reshape(ramp(100).view(), 0);
        assert_eq!(out.shape(), &[10, 10]);
        assert_eq!(out.row(3).to_vec(), (31..=40).map(|v| v as f64).collect::<Vec<_>>());
    }

    #[test]
    fn trailing_partial_bin_is_discarded() {
        let binner = Binner::new(10, 1.0).unwrap();
        let series = ramp(105);
        assert_eq!(binner.bin_count(series.len()), 10);
        let out = binner.reshape(series.view(), 0);
        assert_eq!(out.len(), 100);
        assert_eq!(out[[9, 9]], 100.0);
        assert_eq!(binner.mean(series.view()).len(), 10);
    }

    #[test]
    fn padding_borrows_neighbours_and_zero_fills_ends() {
        let binner = Binner::new(4, 1.0).unwrap();
        let out = binner.reshape(ramp(12).view(), 2);
        assert_eq!(out.shape(), &[3, 6]);
        assert_eq!(out.row(0).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(out.row(1).to_vec(), vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(out.row(2).to_vec(), vec![8.0, 9.0, 10.0, 11.0, 12.0, 0.0]);
    }

    #[test]
    fn all_nan_bin_averages_to_nan() {
        let binner = Binner::new(3, 1.0).unwrap();
        let data = arr2(&[[f64::NAN, f64::NAN, f64::NAN, 1.0, f64::NAN, 3.0, f64::NAN, 7.0, f64::NAN]]);
        let avg = binner.do_avg(data.view());
        let var = binner.do_var(data.view());
        assert!(avg[[0, 0]].is_nan());
        assert!(var[[0, 0]].is_nan());
        assert_eq!(avg[[0, 1]], 2.0);
        assert_eq!(var[[0, 1]], 1.0);
        // one valid sample: the mean is defined, the variance is not
        assert_eq!(avg[[0, 2]], 7.0);
        assert!(var[[0, 2]].is_nan());
    }

    #[test]
    fn variance_is_demeaned_per_bin() {
        let binner = Binner::new(2, 1.0).unwrap();
        let data = arr2(&[[0.0, 2.0, 100.0, 102.0]]);
        let var = binner.do_var(data.view());
        assert_eq!(var.row(0).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn stress_components_are_in_order() {
        let binner = Binner::new(4, 1.0).unwrap();
        let vel = arr2(&[
            [1.0, -1.0, 1.0, -1.0],
            [2.0, 2.0, -2.0, -2.0],
            [0.5, -0.5, 0.5, -0.5],
        ]);
        let stress = binner.calc_stress(vel.view()).unwrap();
        assert_eq!(stress.shape(), &[3, 1]);
        assert!((stress[[0, 0]] - 0.5).abs() < 1e-12);
        assert!(stress[[1, 0]].abs() < 1e-12);
        assert!(stress[[2, 0]].abs() < 1e-12);
    }

    #[test]
    fn noise_subtraction_is_unclamped_by_default() {
        let binner = Binner::new(4, 1.0).unwrap();
        let vel = arr2(&[
            [0.1, -0.1, 0.1, -0.1],
            [0.0, 0.0, 0.0, 0.0],
            [1.0, -1.0, 1.0, -1.0],
        ]);
        let tke = binner.calc_tke(vel.view(), Some([0.2, 0.0, 0.5]), false).unwrap();
        assert!((tke[[0, 0]] - (0.01 - 0.04)).abs() < 1e-12);
        assert!((tke[[2, 0]] - 0.75).abs() < 1e-12);
        let clamped = binner.calc_tke(vel.view(), Some([0.2, 0.0, 0.5]), true).unwrap();
        assert_eq!(clamped[[0, 0]], 0.0);
    }

    #[test]
    fn beam_geometry_noise_matches_janus_transform() {
        let noise = noise_from_beam_geometry(0.01, 30.0);
        assert!((noise[0] - 0.01 / 2f64.sqrt() / 0.5).abs() < 1e-12);
        assert_eq!(noise[0], noise[1]);
        assert!((noise[2] - 0.01 / (2.0 * 30f64.to_radians().cos())).abs() < 1e-12);
    }
}
