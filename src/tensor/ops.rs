//! Computational kernels on [`Tensor`].
//!
//! Every kernel is a plain loop over row-major slices. The attention layers
//! lean on four groups of primitives: matrix products (`matmul`, `bmm`),
//! pointwise nonlinearities (`leaky_relu`, `elu`), row gathering
//! (`index_select`) and row scattering (`scatter_add_rows`).

use super::Tensor;

impl Tensor {
    /// Matrix multiply: `[m, k] x [k, n] -> [m, n]`.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2-D or the inner dimensions disagree.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul lhs must be 2-D, got {:?}", self.shape());
        assert_eq!(other.ndim(), 2, "matmul rhs must be 2-D, got {:?}", other.shape());
        let (m, k) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(
            k, k2,
            "matmul inner dimensions disagree: {:?} x {:?}",
            self.shape(),
            other.shape()
        );

        let a = self.data();
        let b = other.data();
        let mut out = vec![0.0f32; m * n];

        for i in 0..m {
            for l in 0..k {
                let a_il = a[i * k + l];
                if a_il == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out[i * n + j] += a_il * b[l * n + j];
                }
            }
        }

        Tensor::from_vec(out, &[m, n])
    }

    /// Batched matrix multiply: `[b, m, k] x [b, k, n] -> [b, m, n]`.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 3-D or batch/inner dimensions disagree.
    #[must_use]
    pub fn bmm(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 3, "bmm lhs must be 3-D, got {:?}", self.shape());
        assert_eq!(other.ndim(), 3, "bmm rhs must be 3-D, got {:?}", other.shape());
        let (batch, m, k) = (self.shape()[0], self.shape()[1], self.shape()[2]);
        let (batch2, k2, n) = (other.shape()[0], other.shape()[1], other.shape()[2]);
        assert_eq!(
            batch, batch2,
            "bmm batch dimensions disagree: {:?} x {:?}",
            self.shape(),
            other.shape()
        );
        assert_eq!(
            k, k2,
            "bmm inner dimensions disagree: {:?} x {:?}",
            self.shape(),
            other.shape()
        );

        let a = self.data();
        let b = other.data();
        let mut out = vec![0.0f32; batch * m * n];

        for bi in 0..batch {
            let a_base = bi * m * k;
            let b_base = bi * k * n;
            let o_base = bi * m * n;
            for i in 0..m {
                for l in 0..k {
                    let a_il = a[a_base + i * k + l];
                    if a_il == 0.0 {
                        continue;
                    }
                    for j in 0..n {
                        out[o_base + i * n + j] += a_il * b[b_base + l * n + j];
                    }
                }
            }
        }

        Tensor::from_vec(out, &[batch, m, n])
    }

    /// Transpose a 2-D tensor: `[r, c] -> [c, r]`.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2-D.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose expects 2-D, got {:?}", self.shape());
        let (r, c) = (self.shape()[0], self.shape()[1]);
        let src = self.data();
        let mut out = vec![0.0f32; r * c];

        for i in 0..r {
            for j in 0..c {
                out[j * r + i] = src[i * c + j];
            }
        }

        Tensor::from_vec(out, &[c, r])
    }

    /// Add a vector to every row along the last dimension.
    ///
    /// `self` has shape `[..., w]`, `other` has shape `[w]`.
    ///
    /// # Panics
    ///
    /// Panics if `other` doesn't match the last dimension of `self`.
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        let w = *self.shape().last().expect("broadcast_add on 0-D tensor");
        assert_eq!(
            other.numel(),
            w,
            "broadcast_add operand has {} elements, last dimension is {}",
            other.numel(),
            w
        );

        let b = other.data();
        let data: Vec<f32> = self
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| x + b[i % w])
            .collect();

        Tensor::from_vec(data, self.shape())
    }

    /// Leaky `ReLU`: `max(negative_slope * x, x)`.
    #[must_use]
    pub fn leaky_relu(&self, negative_slope: f32) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .map(|&v| if v > 0.0 { v } else { negative_slope * v })
            .collect();
        Tensor::from_vec(data, self.shape())
    }

    /// ELU with alpha = 1: `x` for `x > 0`, `exp(x) - 1` otherwise.
    #[must_use]
    pub fn elu(&self) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .map(|&v| if v > 0.0 { v } else { v.exp() - 1.0 })
            .collect();
        Tensor::from_vec(data, self.shape())
    }

    /// Gather rows along the first axis: output row `e` is `self` row
    /// `indices[e]`.
    ///
    /// This is the lift operation: projecting per-node values onto per-edge
    /// values through an index array.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    #[must_use]
    pub fn index_select(&self, indices: &[usize]) -> Tensor {
        assert!(self.ndim() >= 1, "index_select on 0-D tensor");
        let rows = self.shape()[0];
        let row_len: usize = self.shape()[1..].iter().product();
        let src = self.data();

        let mut out = Vec::with_capacity(indices.len() * row_len);
        for &idx in indices {
            assert!(idx < rows, "index_select index {idx} out of bounds (rows={rows})");
            out.extend_from_slice(&src[idx * row_len..(idx + 1) * row_len]);
        }

        let mut shape = vec![indices.len()];
        shape.extend_from_slice(&self.shape()[1..]);
        Tensor::from_vec(out, &shape)
    }

    /// Accumulate rows of `source` into `self` at positions given by
    /// `indices`, summing on collision: `self[indices[e]] += source[e]`.
    ///
    /// Iteration is in edge order, so float rounding order is deterministic.
    ///
    /// # Panics
    ///
    /// Panics if trailing dimensions disagree, `indices` doesn't match the
    /// first dimension of `source`, or an index is out of bounds.
    pub fn scatter_add_rows(&mut self, indices: &[usize], source: &Tensor) {
        let rows = self.shape()[0];
        let row_len: usize = self.shape()[1..].iter().product();
        let src_row_len: usize = source.shape()[1..].iter().product();
        assert_eq!(
            row_len, src_row_len,
            "scatter_add_rows trailing dimensions disagree: {:?} vs {:?}",
            self.shape(),
            source.shape()
        );
        assert_eq!(
            indices.len(),
            source.shape()[0],
            "scatter_add_rows got {} indices for {} source rows",
            indices.len(),
            source.shape()[0]
        );

        let src = source.data();
        let dst = self.data_mut();
        for (e, &idx) in indices.iter().enumerate() {
            assert!(idx < rows, "scatter_add_rows index {idx} out of bounds (rows={rows})");
            let d = idx * row_len;
            let s = e * row_len;
            for f in 0..row_len {
                dst[d + f] += src[s + f];
            }
        }
    }
}
