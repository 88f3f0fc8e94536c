//! GEMM for batched dense inference.
//!
//! - default: a safe row-by-row dot-product loop
//! - optional: `matrixmultiply::sgemm` via the `matrixmultiply` feature

/// `c += a * b^T` with `a: (m, k)`, `b: (n, k)` and `c: (m, n)`, all contiguous row-major.
///
/// `b` is a dense layer's weight matrix in its stored `(out_dim, in_dim)` layout.
#[inline]
pub(crate) fn gemm_abt_acc(m: usize, n: usize, k: usize, a: &[f32], b: &[f32], c: &mut [f32]) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), n * k);
    debug_assert_eq!(c.len(), m * n);
    if m == 0 || n == 0 || k == 0 {
        return;
    }

    #[cfg(feature = "matrixmultiply")]
    // SAFETY: the three buffers hold exactly `m*k`, `n*k` and `m*n` elements (checked above in
    // debug builds, guaranteed by the only caller), and the strides stay inside them.
    unsafe {
        // b^T is (k, n) with row stride 1 and column stride k.
        matrixmultiply::sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            k as isize,
            1,
            b.as_ptr(),
            1,
            k as isize,
            1.0,
            c.as_mut_ptr(),
            n as isize,
            1,
        );
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for (a_row, c_row) in a.chunks_exact(k).zip(c.chunks_exact_mut(n)) {
        for (c_ij, b_row) in c_row.iter_mut().zip(b.chunks_exact(k)) {
            let mut acc = 0.0_f32;
            for (x, w) in a_row.iter().zip(b_row) {
                acc = x.mul_add(*w, acc);
            }
            *c_ij += acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_a_times_b_transposed() {
        // a = [[1, 2], [3, 4], [5, 6]], b = [[1, 0], [0, 1], [1, 1], [2, -1]]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, -1.0];
        let mut c = [1.0_f32; 12];
        gemm_abt_acc(3, 4, 2, &a, &b, &mut c);
        assert_eq!(
            c,
            [2.0, 3.0, 4.0, 1.0, 4.0, 5.0, 8.0, 3.0, 6.0, 7.0, 12.0, 5.0]
        );
    }
}
