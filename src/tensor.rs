use std::ops::Range;

use rand::{ Rng, RngCore };
use serde::{ Serialize, Deserialize };

mod cops;
mod lops;

use crate::{
  shape::Shape,
  scalar::{ Inner, Numeric, Real },
};


/// Dense, contiguous multidimensional array.
///
/// Tensors own their storage. Slicing operations copy, so tensors
/// handed out by the sequence codec never alias each other.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: Vec<T>,
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    assert_eq!(shape.size(), data.len(),
      "{} doesn't match data length {}", shape, data.len());
    Self { shape, data }
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Self {
    Self::from_shape(Shape::new(shape), data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  pub fn fill(shape: &[usize], filler: T) -> Self {
    Self::new(shape, vec![filler; shape.iter().product()])
  }

  /// Concatenate tensors along their leading dimension.
  /// `inner` gives the trailing dims used when `rows` is empty.

  pub fn stack(rows: &[Tensor<T>], inner: &[usize]) -> Self {
    let mut dims = vec![rows.iter().map(|row| row.dim(0) ).sum()];
    dims.extend_from_slice(inner);
    let data = rows.iter()
      .map(|row| row.data.as_slice() )
      .collect::<Vec<_>>()
      .concat();
    Self::new(&dims, data)
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  /// Size of dimension `dim`, counting from the back for negative values.

  pub fn dim(&self, dim: isize) -> usize {
    self.shape[dim]
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn raw(&self) -> &[T] {
    &self.data
  }

  pub fn raw_mut(&mut self) -> &mut [T] {
    &mut self.data
  }

  /// Number of items along the leading dimension.

  pub fn len(&self) -> usize {
    self.shape.at_or(0, 0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Copy of the leading-dimension slice `range`.

  pub fn slice_rows(&self, range: Range<usize>) -> Self {
    assert!(range.start <= range.end && range.end <= self.len(),
      "Row range {:?} out of bounds for {}", range, self.shape);
    let row = self.shape.strides.first().copied().unwrap_or(1);
    let mut dims = self.shape.dims.clone();
    dims[0] = range.end - range.start;
    Self::new(&dims, self.data[range.start * row .. range.end * row].to_vec())
  }

  /// Copy of item `idx` along the leading dimension, with that dimension removed.

  pub fn at(&self, idx: usize) -> Self {
    let dims = self.shape.dims[1..].to_vec();
    let row = self.shape.strides[0];
    Self::new(&dims, self.data[idx * row .. (idx + 1) * row].to_vec())
  }

  /// Repeat this vector as `n` rows of a matrix.

  pub fn broadcast_rows(&self, n: usize) -> Self {
    assert_eq!(self.rank(), 1, "Can only broadcast vectors, got {}", self.shape);
    let data = (0..n)
      .flat_map(|_| self.data.iter().copied() )
      .collect();
    Self::new(&[n, self.size()], data)
  }

  /// Copy of columns `range` of every row (last dimension).

  pub fn cols(&self, range: Range<usize>) -> Self {
    let width = self.dim(-1);
    assert!(range.start <= range.end && range.end <= width,
      "Column range {:?} out of bounds for {}", range, self.shape);
    let data = self.data
      .chunks(width.max(1))
      .flat_map(|row| row[range.clone()].iter().copied() )
      .collect();
    let mut dims = self.shape.dims.clone();
    *dims.last_mut().unwrap() = range.end - range.start;
    Self::new(&dims, data)
  }

  /// Concatenate along the last dimension.
  /// All parts must agree in every other dimension.

  pub fn concat_cols(parts: &[&Self]) -> Self {
    let outer = &parts[0].shape.dims[..parts[0].rank() - 1];
    for part in parts {
      assert_eq!(&part.shape.dims[..part.rank() - 1], outer,
        "Cannot concat {} & {} tensors", parts[0].shape, part.shape);
    }
    let rows: usize = outer.iter().product();
    let width: usize = parts.iter().map(|part| part.dim(-1) ).sum();
    let mut data = Vec::with_capacity(rows * width);
    for r in 0..rows {
      for part in parts {
        let w = part.dim(-1);
        data.extend_from_slice(&part.data[r * w .. (r + 1) * w]);
      }
    }
    let mut dims = outer.to_vec();
    dims.push(width);
    Self::new(&dims, data)
  }

  /// Copy of the first `rows` rows of timestep `t` of a
  /// `(time, batch, features)` tensor.

  pub fn block(&self, t: usize, rows: usize) -> Self {
    assert_eq!(self.rank(), 3, "Expected (time, batch, features) tensor, got {}", self.shape);
    assert!(rows <= self.dim(1));
    let start = self.shape.index(&[t]);
    let width = self.dim(2);
    Self::new(&[rows, width], self.data[start .. start + rows * width].to_vec())
  }

  /// Overwrite the leading rows of timestep `t` with `src`.

  pub fn set_block(&mut self, t: usize, src: &Self) {
    assert_eq!(self.rank(), 3, "Expected (time, batch, features) tensor, got {}", self.shape);
    assert!(src.rank() == 2 && src.dim(1) == self.dim(2) && src.dim(0) <= self.dim(1),
      "Could not write {} block into {}", src.shape, self.shape);
    let start = self.shape.index(&[t]);
    self.data[start .. start + src.size()].copy_from_slice(&src.data);
  }

  pub fn vectorize<O, F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.data.iter().copied().map(cb).collect();
    Tensor::new(&self.shape.dims, data)
  }

  pub fn zip<O, F>(&self, rhs: &Self, mut cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T, T) -> O,
  {
    assert_eq!(self.shape.dims, rhs.shape.dims,
      "Could not zip {} & {}", self.shape, rhs.shape);
    let data = self.data.iter()
      .zip(rhs.data.iter())
      .map(|(&a, &b)| cb(a, b) )
      .collect();
    Tensor::new(&self.shape.dims, data)
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn zeros(shape: &[usize]) -> Self {
    Self::fill(shape, T::zero())
  }

  pub fn ones(shape: &[usize]) -> Self {
    Self::fill(shape, T::one())
  }

  pub fn arrange(shape: &[usize], start: T, step: T) -> Self {
    Self::new(shape, (0..shape.iter().product())
      .map(|i| T::from(i).unwrap() * step + start )
      .collect())
  }

  pub fn add(&self, rhs: &Self) -> Self {
    self.zip(rhs, |a, b| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Self {
    self.zip(rhs, |a, b| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Self {
    self.zip(rhs, |a, b| a * b )
  }

  pub fn scale(&self, factor: T) -> Self {
    self.vectorize(|a| a * factor )
  }

  pub fn sum(&self) -> T {
    self.data.iter().copied().sum()
  }

  /// Sum over the leading dimension.

  pub fn sum_rows(&self) -> Self {
    let dims = self.shape.dims[1..].to_vec();
    let width: usize = dims.iter().product();
    let mut out = vec![T::zero(); width];
    for row in self.data.chunks(width.max(1)) {
      for (acc, &a) in out.iter_mut().zip(row) {
        *acc += a;
      }
    }
    Self::new(&dims, out)
  }
}

impl<T: Numeric> std::ops::AddAssign<&Tensor<T>> for Tensor<T> {
  fn add_assign(&mut self, rhs: &Tensor<T>) {
    assert_eq!(self.shape.dims, rhs.shape.dims,
      "Could not add {} to {}", rhs.shape, self.shape);
    for (a, &b) in self.data.iter_mut().zip(&rhs.data) {
      *a += b;
    }
  }
}

impl<T: Real> Tensor<T> {
  pub fn uniform(shape: &[usize], low: T, high: T, rng: &mut dyn RngCore) -> Self {
    let data = (0..shape.iter().product())
      .map(|_| rng.gen_range(low, high) )
      .collect();
    Self::new(shape, data)
  }

  /// Uniform samples in `±sqrt(6 / (fan_in + fan_out))` for a
  /// `(fan_out, fan_in)` weight matrix.

  pub fn glorot_uniform(shape: &[usize], rng: &mut dyn RngCore) -> Self {
    let fan_out = shape.first().copied().unwrap_or(1);
    let fan_in = shape.get(1).copied().unwrap_or(1);
    let limit = T::from(6.0 / (fan_in + fan_out) as f64).unwrap().sqrt();
    Self::uniform(shape, -limit, limit, rng)
  }

  /// Inverted dropout mask: zero with probability `drop`,
  /// `1 / (1 - drop)` otherwise.

  pub fn bernoulli(shape: &[usize], drop: T, rng: &mut dyn RngCore) -> Self {
    let keep = T::one() - drop;
    let scale = T::one() / keep;
    let data = (0..shape.iter().product())
      .map(|_| if rng.gen_range(T::zero(), T::one()) < keep { scale } else { T::zero() } )
      .collect();
    Self::new(shape, data)
  }
}

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape, &self.data, f)?;
    Ok(())
  }
}

fn print_chunks<T: std::fmt::Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = (0..idx * 2).map(|_| " ").collect::<String>();
  if shape.rank() == 0 {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == shape.rank() - 1 || vec.is_empty() {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    let chunks = vec.chunks(vec.len() / shape.dims[idx]);
    writeln!(f, "{indent}[")?;
    for chunk in chunks {
      print_chunks(idx + 1, shape, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}
