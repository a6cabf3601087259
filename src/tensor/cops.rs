use crate::{
  tensor::Tensor,
  scalar::Float,
};


impl Float for f32 {
  #[cfg(feature = "unsafe")]
  fn gemm(
    m: usize, k: usize, n: usize,
    a: &[f32], a_strides: (isize, isize),
    b: &[f32], b_strides: (isize, isize),
    c: &mut [f32],
  ) {
    assert!(a.len() >= m * k && b.len() >= k * n && c.len() == m * n,
      "Buffers too small for {m}x{k} · {k}x{n} product");
    unsafe {
      matrixmultiply::sgemm(
        m, k, n,
        1.0,
        a.as_ptr(), a_strides.0, a_strides.1,
        b.as_ptr(), b_strides.0, b_strides.1,
        0.0,
        c.as_mut_ptr(), n as isize, 1,
      );
    }
  }
}

impl Float for f64 {
  #[cfg(feature = "unsafe")]
  fn gemm(
    m: usize, k: usize, n: usize,
    a: &[f64], a_strides: (isize, isize),
    b: &[f64], b_strides: (isize, isize),
    c: &mut [f64],
  ) {
    assert!(a.len() >= m * k && b.len() >= k * n && c.len() == m * n,
      "Buffers too small for {m}x{k} · {k}x{n} product");
    unsafe {
      matrixmultiply::dgemm(
        m, k, n,
        1.0,
        a.as_ptr(), a_strides.0, a_strides.1,
        b.as_ptr(), b_strides.0, b_strides.1,
        0.0,
        c.as_mut_ptr(), n as isize, 1,
      );
    }
  }
}

impl<T: Float> Tensor<T> {
  /// Matrix product of two 2-D tensors, optionally reading either
  /// operand transposed. Transposition only swaps strides.

  pub fn gemm(&self, rhs: &Self, trans_a: bool, trans_b: bool) -> Self {
    assert!(self.rank() == 2 && rhs.rank() == 2,
      "Can only multiply matrices, got {} & {}", self.shape(), rhs.shape());

    let (rows_a, cols_a) = (self.dim(0), self.dim(1));
    let (rows_b, cols_b) = (rhs.dim(0), rhs.dim(1));

    let (m, k, a_strides) = if trans_a {
      (cols_a, rows_a, (1, cols_a as isize))
    } else {
      (rows_a, cols_a, (cols_a as isize, 1))
    };
    let (k2, n, b_strides) = if trans_b {
      (cols_b, rows_b, (1, cols_b as isize))
    } else {
      (rows_b, cols_b, (cols_b as isize, 1))
    };
    assert_eq!(k, k2, "Could not multiply {} & {} matrices (transposed: {}, {})",
      self.shape(), rhs.shape(), trans_a, trans_b);

    let mut data = vec![T::zero(); m * n];
    if m * n > 0 && k > 0 {
      T::gemm(m, k, n, self.raw(), a_strides, rhs.raw(), b_strides, &mut data);
    }
    Tensor::new(&[m, n], data)
  }

  pub fn mm(&self, rhs: &Self) -> Self {
    self.gemm(rhs, false, false)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matmul() {
    let x = Tensor::new(&[2,3], vec![1., 2., 3., 4., 5., 6.]);
    let y = Tensor::new(&[3,2], vec![1., 2., 3., 4., 5., 6.]);
    assert_eq!(x.mm(&y), Tensor::new(&[2,2], vec![22., 28., 49., 64.]));
  }

  #[test]
  fn matmul_vector() {
    let x = Tensor::new(&[2,3], vec![1.0f32, 2., 3., 4., 5., 6.]);
    let y = Tensor::new(&[3,1], vec![1., 2., 3.]);
    assert_eq!(x.mm(&y), Tensor::new(&[2,1], vec![14., 32.]));
  }

  #[test]
  fn transposed() {
    let x = Tensor::new(&[2,3], vec![1., 2., 3., 4., 5., 6.]);
    // xᵀ · x
    assert_eq!(x.gemm(&x, true, false), Tensor::new(&[3,3], vec![
      17., 22., 27.,
      22., 29., 36.,
      27., 36., 45.,
    ]));
    // x · xᵀ
    assert_eq!(x.gemm(&x, false, true), Tensor::new(&[2,2], vec![14., 32., 32., 77.]));
  }

  #[test]
  fn empty_operands() {
    let x = Tensor::<f64>::zeros(&[0,3]);
    let w = Tensor::<f64>::ones(&[4,3]);
    assert_eq!(x.gemm(&w, false, true).dims(), &[0, 4]);
    assert_eq!(x.gemm(&Tensor::zeros(&[0,2]), true, false), Tensor::zeros(&[3,2]));
  }
}
