//! Algebraic least-squares circle fit (Kåsa method).
//!
//! Works directly in degree space, which is fine for the sub-2-NM radii the
//! spoofing detector cares about; anything larger would need a local
//! projection first.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FitError {
    /// Fewer than three points, or a degenerate (e.g. collinear) point set
    /// that leaves the normal equations singular.
    #[error("not enough independent points for a circle fit")]
    InsufficientPoints,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleFit {
    pub xc: f64,
    pub yc: f64,
    pub r: f64,
    /// RMS radial deviation of the input points from the fitted circle.
    pub residual: f64,
}

/// Fits `x² + y² = 2·xc·x + 2·yc·y + d` by least squares and recovers the
/// centre and radius.
///
/// The data is centred on its mean first: the fit is translation-equivariant,
/// and the raw normal equations are hopelessly ill-conditioned for a small
/// circle far from the origin.
pub fn fit_circle(xs: &[f64], ys: &[f64]) -> Result<CircleFit, FitError> {
    let n = xs.len();
    if n < 3 || ys.len() != n {
        return Err(FitError::InsufficientPoints);
    }

    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = ys.iter().sum::<f64>() / n as f64;

    // Normal equations M·c = v for the design matrix with rows (2x, 2y, 1)
    // and right-hand side b = x² + y², in centred coordinates.
    let mut m = [[0.0f64; 3]; 3];
    let mut v = [0.0f64; 3];
    for (&x, &y) in xs.iter().zip(ys) {
        let (x, y) = (x - x_mean, y - y_mean);
        let b = x * x + y * y;
        m[0][0] += 4.0 * x * x;
        m[0][1] += 4.0 * x * y;
        m[0][2] += 2.0 * x;
        m[1][1] += 4.0 * y * y;
        m[1][2] += 2.0 * y;
        v[0] += 2.0 * x * b;
        v[1] += 2.0 * y * b;
        v[2] += b;
    }
    m[1][0] = m[0][1];
    m[2][0] = m[0][2];
    m[2][1] = m[1][2];
    m[2][2] = n as f64;

    let c = solve_3x3(m, v).ok_or(FitError::InsufficientPoints)?;
    let (xc, yc, d) = (c[0], c[1], c[2]);

    let r_sq = xc * xc + yc * yc + d;
    if !r_sq.is_finite() || r_sq < 0.0 {
        return Err(FitError::InsufficientPoints);
    }
    let r = r_sq.sqrt();
    let (xc, yc) = (xc + x_mean, yc + y_mean);

    let mean_sq = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let dev = ((x - xc).hypot(y - yc)) - r;
            dev * dev
        })
        .sum::<f64>()
        / n as f64;

    Ok(CircleFit {
        xc,
        yc,
        r,
        residual: mean_sq.sqrt(),
    })
}

/// Gaussian elimination with partial pivoting; `None` on a singular system.
fn solve_3x3(mut m: [[f64; 3]; 3], mut v: [f64; 3]) -> Option<[f64; 3]> {
    const PIVOT_EPS: f64 = 1e-12;

    for col in 0..3 {
        let pivot_row = (col..3)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap();
        if m[pivot_row][col].abs() < PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            m.swap(pivot_row, col);
            v.swap(pivot_row, col);
        }
        for row in (col + 1)..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            v[row] -= factor * v[col];
        }
    }

    let mut out = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut acc = v[row];
        for k in (row + 1)..3 {
            acc -= m[row][k] * out[k];
        }
        out[row] = acc / m[row][row];
    }
    if out.iter().all(|x| x.is_finite()) {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn recovers_a_perfect_circle() {
        let (xc, yc, r) = (37.8, -122.4, 0.0083);
        let (xs, ys): (Vec<f64>, Vec<f64>) = (0..24)
            .map(|i| {
                let t = TAU * i as f64 / 24.0;
                (xc + r * t.cos(), yc + r * t.sin())
            })
            .unzip();
        let fit = fit_circle(&xs, &ys).unwrap();
        assert!((fit.xc - xc).abs() < 1e-9);
        assert!((fit.yc - yc).abs() < 1e-9);
        assert!((fit.r - r).abs() < 1e-9);
        assert!(fit.residual < 1e-9);
    }

    #[test]
    fn noisy_points_report_a_residual() {
        let (xc, yc, r) = (0.0, 0.0, 1.0);
        let (xs, ys): (Vec<f64>, Vec<f64>) = (0..16)
            .map(|i| {
                let t = TAU * i as f64 / 16.0;
                let wobble = if i % 2 == 0 { 1.01 } else { 0.99 };
                (xc + r * wobble * t.cos(), yc + r * wobble * t.sin())
            })
            .unzip();
        let fit = fit_circle(&xs, &ys).unwrap();
        assert!((fit.r - r).abs() < 0.05);
        assert!(fit.residual > 1e-3);
    }

    #[test]
    fn too_few_points() {
        assert_eq!(
            fit_circle(&[0.0, 1.0], &[0.0, 1.0]),
            Err(FitError::InsufficientPoints)
        );
    }

    #[test]
    fn collinear_points_are_singular() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(fit_circle(&xs, &ys), Err(FitError::InsufficientPoints));
    }
}
