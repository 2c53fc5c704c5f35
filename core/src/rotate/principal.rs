use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult};

/// Direction of maximum horizontal variance, radians counter-clockwise from east.
///
/// The axis is the leading eigenvector of the NaN-aware `(u, v)` covariance;
/// the result lies in `(-pi/2, pi/2]`.
pub fn calc_principal_angle(u: ArrayView1<f64>, v: ArrayView1<f64>) -> CoreResult<f64> {
    if u.len() != v.len() {
        return Err(CoreError::InvalidInput(format!(
            "u has {} samples, v has {}",
            u.len(),
            v.len()
        )));
    }
    let suu = StatsHelper::nanvar(u);
    let svv = StatsHelper::nanvar(v);
    let suv = StatsHelper::nancov(u, v);
    if suu.is_nan() || svv.is_nan() || suv.is_nan() {
        return Err(CoreError::Numerical(
            "not enough valid samples for a principal direction".into(),
        ));
    }
    let total = suu + svv;
    let spread = (suu - svv).hypot(2.0 * suv);
    if total <= 0.0 || spread <= 1e-9 * total {
        return Err(CoreError::Numerical(format!(
            "degenerate horizontal covariance (uu={:.3e}, vv={:.3e}, uv={:.3e})",
            suu, svv, suv
        )));
    }
    Ok(0.5 * (2.0 * suv).atan2(suu - svv))
}

pub fn angle_to_heading_deg(angle_rad: f64) -> f64 {
    (90.0 - angle_rad.to_degrees()).rem_euclid(360.0)
}

pub fn heading_deg_to_angle(heading_deg: f64) -> f64 {
    (90.0 - heading_deg).to_radians()
}

/// Rotate the horizontal pair by `-angle` (or `+angle` with `reverse`).
/// Rows beyond the first two are copied unchanged.
pub fn earth2principal(
    vel: ArrayView2<f64>,
    principal_angle_rad: f64,
    reverse: bool,
) -> CoreResult<Array2<f64>> {
    if vel.nrows() < 2 {
        return Err(CoreError::InvalidInput(format!(
            "principal rotation needs horizontal components, got {} rows",
            vel.nrows()
        )));
    }
    let angle = if reverse {
        principal_angle_rad
    } else {
        -principal_angle_rad
    };
    let (sa, ca) = angle.sin_cos();
    let mut out = vel.to_owned();
    for (t, mut column) in out.columns_mut().into_iter().enumerate() {
        let u = vel[[0, t]];
        let v = vel[[1, t]];
        column[0] = ca * u - sa * v;
        column[1] = sa * u + ca * v;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array1};

    #[test]
    fn zero_angle_is_identity() {
        let vel = arr2(&[[1.0, -2.0, 0.5], [0.3, 0.0, 4.0], [9.0, 8.0, 7.0]]);
        let out = earth2principal(vel.view(), 0.0, false).unwrap();
        assert_eq!(out, vel);
    }

    #[test]
    fn flow_along_principal_axis_maps_to_u() {
        let angle = 30f64.to_radians();
        let n = 200;
        let speed = Array1::from_iter((0..n).map(|t| ((t as f64) * 0.1).sin()));
        let u = speed.mapv(|s| s * angle.cos());
        let v = speed.mapv(|s| s * angle.sin());
        let found = calc_principal_angle(u.view(), v.view()).unwrap();
        assert!((found - angle).abs() < 1e-9);

        let mut vel = Array2::<f64>::zeros((3, n));
        vel.row_mut(0).assign(&u);
        vel.row_mut(1).assign(&v);
        let rotated = earth2principal(vel.view(), found, false).unwrap();
        for t in 0..n {
            assert!((rotated[[0, t]] - speed[t]).abs() < 1e-9);
            assert!(rotated[[1, t]].abs() < 1e-9);
        }
        let back = earth2principal(rotated.view(), found, true).unwrap();
        for (a, b) in back.iter().zip(vel.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn isotropic_covariance_is_degenerate() {
        let u = Array1::from_vec(vec![1.0, -1.0, 0.0, 0.0]);
        let v = Array1::from_vec(vec![0.0, 0.0, 1.0, -1.0]);
        assert!(matches!(
            calc_principal_angle(u.view(), v.view()),
            Err(CoreError::Numerical(_))
        ));
        let still = Array1::from_elem(4, 0.2);
        assert!(calc_principal_angle(still.view(), still.view()).is_err());
    }

    #[test]
    fn heading_conversion_round_trips() {
        assert!((angle_to_heading_deg(0.0) - 90.0).abs() < 1e-12);
        assert!((angle_to_heading_deg(std::f64::consts::FRAC_PI_4) - 45.0).abs() < 1e-12);
        assert!((angle_to_heading_deg(-std::f64::consts::FRAC_PI_2) - 180.0).abs() < 1e-12);
        assert!((heading_deg_to_angle(angle_to_heading_deg(0.4)) - 0.4).abs() < 1e-12);
    }
}
