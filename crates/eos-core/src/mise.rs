//! Spectral anomaly detection (RX kernel).
//!
//! Every pixel of a band-interleaved cube is ranked by its Mahalanobis-style
//! distance from the scene mean under the scene covariance:
//!
//! ```text
//! s(r, c) = (x - mu)^T  Sigma^+  (x - mu)
//! ```
//!
//! The covariance is inverted through a cyclic Jacobi eigendecomposition
//! with small eigenvalues dropped, so a rank-deficient scene degrades to a
//! pseudo-inverse instead of failing. No external numerics: the solver is
//! a few hundred lines of rotations, which is what makes it auditable for
//! flight.

use crate::heap::DetectionHeap;
use crate::log::Logger;
use crate::memory::{aligned_nbytes, LifoStack};
use crate::status::EosError;
use crate::types::{MiseDetectionResult, ObsShape, PixelDetection};
use crate::util::dsum;

/// Mean pixel over all pixels of each band; zeros for an empty observation.
/// `mp` must hold `shape.bands` values.
pub(crate) fn compute_mean_pixel(data: &[u16], shape: ObsShape, mp: &mut [f64]) {
    let bands = shape.bands as usize;
    let n_pixels = shape.n_pixels() as usize;

    mp.fill(0.0);
    if n_pixels == 0 {
        return;
    }

    for i in 0..n_pixels {
        let pixel = &data[i * bands..(i + 1) * bands];
        for (b, sample) in pixel.iter().enumerate() {
            mp[b] += f64::from(*sample);
        }
    }
    for value in mp.iter_mut() {
        *value /= n_pixels as f64;
    }
}

/// Sample covariance (DOF = N - 1) of the mean-subtracted pixels.
/// `mean_sub` is per-pixel scratch of `bands` values; `cov` receives the
/// `bands x bands` matrix. Fails with a value error for fewer than two
/// pixels.
pub(crate) fn compute_covariance(
    data: &[u16],
    shape: ObsShape,
    mean_pixel: &[f64],
    mean_sub: &mut [f64],
    cov: &mut [f64],
) -> Result<(), EosError> {
    let bands = shape.bands as usize;
    let n_pixels = shape.n_pixels() as usize;

    if n_pixels <= 1 {
        // Sample size not large enough to compute covariance.
        return Err(EosError::Value);
    }

    cov.fill(0.0);
    for i in 0..n_pixels {
        let pixel = &data[i * bands..(i + 1) * bands];
        for b in 0..bands {
            mean_sub[b] = f64::from(pixel[b]) - mean_pixel[b];
        }
        for b1 in 0..bands {
            for b2 in 0..bands {
                cov[b1 * bands + b2] += mean_sub[b1] * mean_sub[b2];
            }
        }
    }
    for value in cov.iter_mut() {
        *value /= (n_pixels - 1) as f64;
    }
    Ok(())
}

/// Apply a plane rotation to two elements of a flattened matrix.
fn rotate(m: &mut [f64], ia: usize, ib: usize, c: f64, s: f64) {
    let a0 = m[ia];
    let b0 = m[ib];
    m[ia] = a0 * c - b0 * s;
    m[ib] = a0 * s + b0 * c;
}

/// Rotate rows/columns `k` and `l` of the working matrix and the
/// eigenvector rows.
fn eigen_rotate(n: usize, a: &mut [f64], v: &mut [f64], k: usize, l: usize, c: f64, s: f64) {
    for i in 0..k {
        rotate(a, n * i + k, n * i + l, c, s);
    }
    for i in (k + 1)..l {
        rotate(a, n * k + i, n * i + l, c, s);
    }
    for i in (l + 1)..n {
        rotate(a, n * k + i, n * l + i, c, s);
    }
    for i in 0..n {
        rotate(v, n * k + i, n * l + i, c, s);
    }
}

/// Refresh the cached index of the largest off-diagonal element in row
/// `idx` (above the diagonal) and column `idx` (below row `idx`).
fn eigen_maxind(n: usize, a: &[f64], idx: usize, row_index: &mut [u32], col_index: &mut [u32]) {
    if idx + 1 < n {
        let mut m = idx + 1;
        let mut mv = a[n * idx + m].abs();
        for i in (idx + 2)..n {
            let val = a[n * idx + i].abs();
            if mv < val {
                mv = val;
                m = i;
            }
        }
        row_index[idx] = m as u32;
    }
    if idx > 0 {
        let mut m = 0;
        let mut mv = a[idx].abs();
        for i in 1..idx {
            let val = a[n * i + idx].abs();
            if mv < val {
                mv = val;
                m = i;
            }
        }
        col_index[idx] = m as u32;
    }
}

/// Rotation parameters (c, s, t) for pivot `p` with diagonal half-gap `y`.
fn eigen_pivot(p: f64, y: f64) -> Result<(f64, f64, f64), EosError> {
    if p == 0.0 {
        return Err(EosError::Assert);
    }
    let mut t = y.abs() + p.hypot(y);
    let norm = p.hypot(t);
    let c = t / norm;
    let mut s = p / norm;
    t = (p / t) * p;
    if y < 0.0 {
        s = -s;
        t = -t;
    }
    Ok((c, s, t))
}

/// Eigendecomposition of the symmetric `n x n` matrix `a` (destroyed) by
/// cyclic Jacobi rotations. Eigenvalues land in `w`, eigenvector rows in
/// `v`; `index_buf` is scratch for 2n cached pivot indices. Iterations are
/// capped at `30 n^2`; hitting the cap returns the best decomposition so
/// far, which preserves the ranking downstream consumers need.
pub(crate) fn eigen_symmetric(
    n: usize,
    a: &mut [f64],
    w: &mut [f64],
    v: &mut [f64],
    index_buf: &mut [u32],
) -> Result<(), EosError> {
    w.fill(0.0);
    v.fill(0.0);
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let (row_index, col_index) = index_buf.split_at_mut(n);
    for k in 0..n {
        w[k] = a[(n + 1) * k];
        eigen_maxind(n, a, k, row_index, col_index);
    }

    if n <= 1 {
        return Ok(());
    }

    for _ in 0..(30 * n * n) {
        // Locate the pivot: largest cached row maximum, then check the
        // cached column maxima against it.
        let mut k = 0;
        let mut mv = a[row_index[0] as usize].abs();
        for i in 1..(n - 1) {
            let val = a[n * i + row_index[i] as usize].abs();
            if mv < val {
                mv = val;
                k = i;
            }
        }
        let mut l = row_index[k] as usize;
        for i in 1..n {
            let val = a[n * col_index[i] as usize + i].abs();
            if mv < val {
                mv = val;
                k = col_index[i] as usize;
                l = i;
            }
        }

        let p = a[n * k + l];
        if p.abs() <= f64::EPSILON {
            break;
        }
        let y = 0.5 * (w[l] - w[k]);

        let (c, s, t) = eigen_pivot(p, y)?;

        a[n * k + l] = 0.0;
        w[k] -= t;
        w[l] += t;

        eigen_rotate(n, a, v, k, l, c, s);
        eigen_maxind(n, a, k, row_index, col_index);
        eigen_maxind(n, a, l, row_index, col_index);
    }

    Ok(())
}

/// Arena bytes needed by [`invert_sym_matrix`] for an `n x n` matrix.
pub(crate) fn invert_sym_matrix_mreq(n: u64) -> u64 {
    // Working copy and eigenvector matrix, eigenvalues, pivot-index cache.
    2 * aligned_nbytes(8 * n * n) + aligned_nbytes(8 * n) + aligned_nbytes(2 * n * 4)
}

/// Pseudo-inverse of the symmetric matrix `a` via eigendecomposition,
/// dropping eigenvalues within `2 eps |sum w|` of zero. Rank deficiency
/// therefore degrades gracefully instead of producing infinities.
pub(crate) fn invert_sym_matrix(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    n: usize,
    a: &[f64],
    a_inv: &mut [f64],
) -> Result<(), EosError> {
    let nn = (n * n) as u64;
    let mut work_buf = stack.allocate_checked(8 * nn, "eigen work matrix", log)?;
    let mut vec_buf = stack.allocate_checked(8 * nn, "eigenvector matrix", log)?;
    let mut val_buf = stack.allocate_checked(8 * n as u64, "eigenvalues", log)?;
    let mut idx_buf = stack.allocate_checked(2 * n as u64 * 4, "pivot index cache", log)?;

    let work = work_buf.as_f64_mut(n * n);
    work.copy_from_slice(a);
    let v = vec_buf.as_f64_mut(n * n);
    let w = val_buf.as_f64_mut(n);
    eigen_symmetric(n, work, w, v, idx_buf.as_u32_mut(2 * n))?;

    let threshold = 2.0 * f64::EPSILON * dsum(w).abs();
    a_inv.fill(0.0);

    // a_inv = V^T diag(1/w) V, skipping near-null eigenvalues.
    for i in 0..n {
        if w[i].abs() <= threshold {
            continue;
        }
        for j in 0..n {
            for k in 0..n {
                a_inv[j * n + k] += v[n * i + j] * v[n * i + k] / w[i];
            }
        }
    }

    stack.deallocate(idx_buf, log)?;
    stack.deallocate(val_buf, log)?;
    stack.deallocate(vec_buf, log)?;
    stack.deallocate(work_buf, log)?;
    Ok(())
}

/// RX statistic of one mean-subtracted pixel; `temp` is `bands` scratch.
fn rx_score(mean_sub: &[f64], cov_inv: &[f64], bands: usize, temp: &mut [f64]) -> f64 {
    for b1 in 0..bands {
        temp[b1] = 0.0;
        for b2 in 0..bands {
            temp[b1] += mean_sub[b2] * cov_inv[b2 * bands + b1];
        }
    }
    let mut score = 0.0;
    for b1 in 0..bands {
        score += temp[b1] * mean_sub[b1];
    }
    score
}

/// Arena bytes needed by [`detect_anomaly_rx`] at `max_bands` bands.
pub(crate) fn detect_anomaly_rx_mreq(max_bands: u64) -> u64 {
    let b = max_bands;
    // mean pixel, mean-subtracted pixel, score scratch.
    let vectors = 3 * aligned_nbytes(8 * b);
    // covariance and its pseudo-inverse.
    let matrices = 2 * aligned_nbytes(8 * b * b);
    vectors + matrices + invert_sym_matrix_mreq(b)
}

/// Rank all pixels by RX score and keep the strongest
/// `result.results.len()` of them, descending. `result.n_results` receives
/// the count actually produced.
pub(crate) fn detect_anomaly_rx(
    stack: &mut LifoStack<'_>,
    log: &mut Logger,
    shape: ObsShape,
    data: &[u16],
    result: &mut MiseDetectionResult,
) -> Result<(), EosError> {
    result.n_results = 0;
    if result.results.is_empty() {
        return Ok(());
    }
    if shape.rows == 0 || shape.cols == 0 {
        return Ok(());
    }
    let bands = shape.bands as usize;
    if (data.len() as u64) < shape.n_pixels() * bands as u64 {
        return Err(EosError::Assert);
    }

    let mut mean_buf = stack.allocate_checked(8 * bands as u64, "mean pixel buffer", log)?;
    let mut sub_buf = stack.allocate_checked(8 * bands as u64, "mean sub buffer", log)?;
    let mut temp_buf = stack.allocate_checked(8 * bands as u64, "temp buffer", log)?;
    let nn = (bands * bands) as u64;
    let mut cov_buf = stack.allocate_checked(8 * nn, "cov buffer", log)?;
    let mut cov_inv_buf = stack.allocate_checked(8 * nn, "cov inv buffer", log)?;

    let mean_pixel = mean_buf.as_f64_mut(bands);
    let mean_sub = sub_buf.as_f64_mut(bands);
    let temp = temp_buf.as_f64_mut(bands);
    let cov = cov_buf.as_f64_mut(bands * bands);
    let cov_inv = cov_inv_buf.as_f64_mut(bands * bands);

    // RX background from all pixels.
    compute_mean_pixel(data, shape, mean_pixel);
    compute_covariance(data, shape, mean_pixel, mean_sub, cov)?;
    invert_sym_matrix(stack, log, bands, cov, cov_inv)?;

    // Score every pixel, keeping the top results in the heap.
    let mut heap = DetectionHeap::new(&mut result.results);
    for row in 0..shape.rows {
        for col in 0..shape.cols {
            let pixel_off = (row as usize * shape.cols as usize + col as usize) * bands;
            for b in 0..bands {
                mean_sub[b] = f64::from(data[pixel_off + b]) - mean_pixel[b];
            }
            heap.push(PixelDetection {
                row,
                col,
                score: rx_score(mean_sub, cov_inv, bands, temp),
            });
        }
    }
    heap.sort();
    result.n_results = heap.len() as u32;

    stack.deallocate(cov_inv_buf, log)?;
    stack.deallocate(cov_buf, log)?;
    stack.deallocate(temp_buf, log)?;
    stack.deallocate(sub_buf, log)?;
    stack.deallocate(mean_buf, log)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LifoArena;

    fn shape(rows: u32, cols: u32, bands: u32) -> ObsShape {
        ObsShape { rows, cols, bands }
    }

    fn scratch_arena(bands: u64) -> LifoArena {
        LifoArena::self_allocated(detect_anomaly_rx_mreq(bands) + 20 * 8)
    }

    #[test]
    fn mean_pixel_averages_bands_independently() {
        let data = [1u16, 2, 3, 4, 5, 6];
        let mut mp = [0.0; 3];
        compute_mean_pixel(&data, shape(1, 2, 3), &mut mp);
        assert_eq!(mp, [2.5, 3.5, 4.5]);

        compute_mean_pixel(&[], shape(0, 2, 3), &mut mp);
        assert_eq!(mp, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn covariance_of_two_pixels() {
        let data = [1u16, 2, 3, 7, 8, 9];
        let s = shape(2, 1, 3);
        let mut mp = [0.0; 3];
        compute_mean_pixel(&data, s, &mut mp);
        assert_eq!(mp, [4.0, 5.0, 6.0]);

        let mut mean_sub = [0.0; 3];
        let mut cov = [0.0; 9];
        compute_covariance(&data, s, &mp, &mut mean_sub, &mut cov).unwrap();
        for value in cov {
            assert!((value - 9.0).abs() < 1e-9);
        }
    }

    #[test]
    fn covariance_needs_two_pixels() {
        let data = [1u16, 2, 3];
        let mut mean_sub = [0.0; 3];
        let mut cov = [0.0; 9];
        assert_eq!(
            compute_covariance(&data, shape(1, 1, 3), &[1.0, 2.0, 3.0], &mut mean_sub, &mut cov),
            Err(EosError::Value)
        );
    }

    #[test]
    fn jacobi_two_by_two_golden_eigenvalues() {
        let mut a = [-5.0, 1.0, 1.0, 3.0];
        let mut w = [0.0; 2];
        let mut v = [0.0; 4];
        let mut idx = [0u32; 4];
        eigen_symmetric(2, &mut a, &mut w, &mut v, &mut idx).unwrap();

        assert!((w[0] - (-5.123_105_63)).abs() < 1e-6, "w[0] = {}", w[0]);
        assert!((w[1] - 3.123_105_63).abs() < 1e-6, "w[1] = {}", w[1]);

        // Eigenvector rows reproduce A x = w x.
        for i in 0..2 {
            let x = [v[2 * i], v[2 * i + 1]];
            let ax = [-5.0 * x[0] + x[1], x[0] + 3.0 * x[1]];
            assert!((ax[0] - w[i] * x[0]).abs() < 1e-9);
            assert!((ax[1] - w[i] * x[1]).abs() < 1e-9);
        }
    }

    #[test]
    fn jacobi_identity_is_a_fixed_point() {
        let mut a = [1.0, 0.0, 0.0, 1.0];
        let mut w = [0.0; 2];
        let mut v = [0.0; 4];
        let mut idx = [0u32; 4];
        eigen_symmetric(2, &mut a, &mut w, &mut v, &mut idx).unwrap();
        assert_eq!(w, [1.0, 1.0]);
        assert_eq!(v, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn pseudo_inverse_of_identity_padded_block() {
        const N: usize = 8;
        let mut a = vec![0.0; N * N];
        for i in 0..N {
            a[i * N + i] = 1.0;
        }
        a[0] = -5.0;
        a[1] = 1.0;
        a[N] = 1.0;
        a[N + 1] = 3.0;

        let mut arena = LifoArena::self_allocated(invert_sym_matrix_mreq(N as u64) + 20 * 8);
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let mut a_inv = vec![0.0; N * N];
        invert_sym_matrix(&mut stack, &mut log, N, &a, &mut a_inv).unwrap();
        assert_eq!(stack.depth(), 0, "inversion must release all scratch");

        let eps = 16.0 * f64::EPSILON;
        assert!((a_inv[0] - (-0.1875)).abs() <= eps);
        assert!((a_inv[1] - 0.0625).abs() <= eps);
        assert!((a_inv[N] - 0.0625).abs() <= eps);
        assert!((a_inv[N + 1] - 0.3125).abs() <= eps);
    }

    #[test]
    fn rx_score_is_a_quadratic_form() {
        let mean_sub = [1.0, 2.0];
        let cov_inv = [2.0, 0.0, 0.0, 1.0];
        let mut temp = [0.0; 2];
        assert_eq!(rx_score(&mean_sub, &cov_inv, 2, &mut temp), 6.0);
    }

    #[test]
    fn rx_flags_the_outlier_pixel() {
        let data = [1u16, 1, 2, 2, 100, 100];
        let mut arena = scratch_arena(2);
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let mut result = MiseDetectionResult::with_capacity(1);
        detect_anomaly_rx(&mut stack, &mut log, shape(1, 3, 2), &data, &mut result).unwrap();

        assert_eq!(result.n_results, 1);
        assert_eq!((result.results[0].row, result.results[0].col), (0, 2));
        assert!(result.results[0].score > 0.0);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn rank_deficient_scene_yields_finite_equal_scores() {
        let data = [1u16, 2, 3, 4, 5, 6];
        let mut arena = scratch_arena(3);
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let mut result = MiseDetectionResult::with_capacity(4);
        detect_anomaly_rx(&mut stack, &mut log, shape(1, 2, 3), &data, &mut result).unwrap();

        assert_eq!(result.n_results, 2);
        let (s0, s1) = (result.results[0].score, result.results[1].score);
        assert!(s0.is_finite() && s1.is_finite());
        assert!((s0 - s1).abs() < 1e-9, "scores {s0} and {s1} should match");
    }

    #[test]
    fn uniform_scene_scores_zero_everywhere() {
        let data = [7u16; 8]; // 4 pixels x 2 bands, all identical
        let mut arena = scratch_arena(2);
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let mut result = MiseDetectionResult::with_capacity(4);
        detect_anomaly_rx(&mut stack, &mut log, shape(2, 2, 2), &data, &mut result).unwrap();

        assert_eq!(result.n_results, 4);
        for det in result.results.iter() {
            assert_eq!(det.score, 0.0);
        }
    }

    #[test]
    fn empty_observation_and_zero_request_short_circuit() {
        let mut arena = scratch_arena(2);
        let mut log = Logger::disabled();

        let mut stack = arena.stack();
        let mut result = MiseDetectionResult::with_capacity(3);
        detect_anomaly_rx(&mut stack, &mut log, shape(0, 3, 2), &[], &mut result).unwrap();
        assert_eq!(result.n_results, 0);
        drop(stack);

        let mut stack = arena.stack();
        let mut none = MiseDetectionResult::with_capacity(0);
        detect_anomaly_rx(&mut stack, &mut log, shape(2, 2, 2), &[1; 8], &mut none).unwrap();
        assert_eq!(none.n_results, 0);
    }

    #[test]
    fn single_pixel_scene_is_a_value_error() {
        let data = [5u16, 6];
        let mut arena = scratch_arena(2);
        let mut log = Logger::disabled();
        let mut stack = arena.stack();
        let mut result = MiseDetectionResult::with_capacity(1);
        assert_eq!(
            detect_anomaly_rx(&mut stack, &mut log, shape(1, 1, 2), &data, &mut result),
            Err(EosError::Value)
        );
    }
}
