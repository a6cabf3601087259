//! The numeric backend seam.
//!
//! Layers never touch array kernels directly; they go through the
//! [Ops] instance shared by every node of a model.

use std::rc::Rc;

use crate::{
  codec::{ self, Layout, Padded },
  error::Result,
  scalar::Float,
  tensor::Tensor,
};


/// Array allocation, math kernels and sequence transforms a backend provides.
///
/// Every method has a default implementation on top of [Tensor], so a
/// backend only overrides what it can do better.

pub trait Ops<T: Float> {
  fn name(&self) -> &str;

  fn alloc(&self, dims: &[usize]) -> Tensor<T> {
    Tensor::zeros(dims)
  }

  fn gemm(&self, a: &Tensor<T>, b: &Tensor<T>, trans_a: bool, trans_b: bool) -> Tensor<T> {
    a.gemm(b, trans_a, trans_b)
  }

  fn sigmoid(&self, x: &Tensor<T>) -> Tensor<T> {
    x.sigmoid()
  }

  fn tanh(&self, x: &Tensor<T>) -> Tensor<T> {
    x.tanh()
  }

  fn backprop_sigmoid(&self, dy: &Tensor<T>, y: &Tensor<T>) -> Tensor<T> {
    y.sigmoid_backward(dy)
  }

  fn backprop_tanh(&self, dy: &Tensor<T>, y: &Tensor<T>) -> Tensor<T> {
    y.tanh_backward(dy)
  }

  fn list2padded(&self, seqs: &[Tensor<T>]) -> Result<Padded<T>> {
    codec::list2padded(seqs)
  }

  fn list2padded_as(&self, seqs: &[Tensor<T>], layout: &Layout) -> Result<Padded<T>> {
    codec::pad_as(seqs, layout)
  }

  fn padded2list(&self, padded: &Padded<T>) -> Result<Vec<Tensor<T>>> {
    codec::padded2list(padded)
  }

  fn flatten(&self, seqs: &[Tensor<T>]) -> Result<Tensor<T>> {
    codec::flatten_arrays(seqs)
  }

  fn unflatten(&self, flat: &Tensor<T>, lengths: &[usize]) -> Result<Vec<Tensor<T>>> {
    codec::unflatten_arrays(flat, lengths)
  }
}


/// Host backend, using `matrixmultiply` for gemm when the
/// `unsafe` feature is enabled.

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOps;

impl CpuOps {
  pub fn shared<T: Float>() -> Rc<dyn Ops<T>> {
    Rc::new(CpuOps)
  }
}

impl<T: Float> Ops<T> for CpuOps {
  fn name(&self) -> &str {
    "cpu"
  }
}
