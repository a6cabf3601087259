use rand::distributions::uniform::SampleUniform;
use num_traits::{ NumAssignOps, Num, NumCast };
use serde::{ Serialize, de::DeserializeOwned };


/// All types that may be used in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + std::fmt::Debug {}
impl<T: PartialEq + Clone + Copy + std::fmt::Debug> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// All continuous numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Real: Numeric + num_traits::Signed + num_traits::real::Real + SampleUniform {}
impl<T: Numeric + num_traits::Signed + num_traits::real::Real + SampleUniform> Real for T {}


/// Floating point types that layers can be trained with.
///
/// Implemented for `f32` and `f64`. Carries the strided matrix
/// multiplication kernel used by [Tensor::gemm](crate::Tensor::gemm).

pub trait Float: Real + Serialize + DeserializeOwned + 'static {
  /// `c = a · b` for an `m×k` matrix `a` and a `k×n` matrix `b`,
  /// each addressed through its (row, column) strides.
  /// `c` is written row-major and must hold `m * n` items.
  #[allow(clippy::too_many_arguments)]
  fn gemm(
    m: usize, k: usize, n: usize,
    a: &[Self], a_strides: (isize, isize),
    b: &[Self], b_strides: (isize, isize),
    c: &mut [Self],
  ) {
    assert_eq!(c.len(), m * n, "Output buffer doesn't hold {m}x{n} items");
    for i in 0..m {
      for j in 0..n {
        let mut acc = Self::zero();
        for l in 0..k {
          acc += a[i * a_strides.0 as usize + l * a_strides.1 as usize] *
            b[l * b_strides.0 as usize + j * b_strides.1 as usize];
        }
        c[i * n + j] = acc;
      }
    }
  }
}
