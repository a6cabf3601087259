//! Conversions between ragged, padded and nested sequence batches.
//!
//! A ragged batch is a list of `(length, features)` arrays. Its padded form
//! is one `(max_length, batch, features)` buffer whose columns are sorted by
//! descending length, so the sequences still active at timestep `t` always
//! occupy the leading `size_at_t[t]` columns.

use itertools::Itertools;
use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  scalar::Numeric,
  tensor::Tensor,
};


/// Sort schedule of a padded batch.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
  /// Number of sequences longer than `t`, for every timestep `t`.
  pub size_at_t: Vec<usize>,
  /// Sequence lengths in padded (sorted) column order.
  pub lengths: Vec<usize>,
  /// Original batch position of every padded column.
  pub indices: Vec<usize>,
}

impl Layout {
  /// Sort `lengths` descending, keeping ties in input order.

  pub fn from_lengths(lengths: &[usize]) -> Self {
    let indices: Vec<usize> = (0..lengths.len())
      .sorted_by(|&a, &b| lengths[b].cmp(&lengths[a]) )
      .collect();
    let lengths: Vec<usize> = indices.iter().map(|&i| lengths[i] ).collect();
    let max_length = lengths.first().copied().unwrap_or(0);
    let size_at_t = (0..max_length)
      .map(|t| lengths.iter().take_while(|&&len| len > t ).count() )
      .collect();
    Self { size_at_t, lengths, indices }
  }

  pub fn max_length(&self) -> usize {
    self.size_at_t.len()
  }

  pub fn batch_size(&self) -> usize {
    self.lengths.len()
  }

  /// Total number of non-padding timesteps.

  pub fn num_steps(&self) -> usize {
    self.lengths.iter().sum()
  }
}


/// Dense encoding of a ragged batch.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Padded<T: Numeric> {
  /// `(max_length, batch, features)`, zero in padded slots.
  pub data: Tensor<T>,
  pub layout: Layout,
}

impl<T: Numeric> Padded<T> {
  pub fn size_at_t(&self) -> &[usize] {
    &self.layout.size_at_t
  }

  pub fn lengths(&self) -> &[usize] {
    &self.layout.lengths
  }

  pub fn indices(&self) -> &[usize] {
    &self.layout.indices
  }

  pub fn features(&self) -> usize {
    self.data.dim(2)
  }

  /// Active rows of timestep `t`.

  pub fn step(&self, t: usize) -> Tensor<T> {
    self.data.block(t, self.layout.size_at_t[t])
  }

  /// Same layout, different data.
  /// The new buffer must cover the same timesteps and batch.

  pub fn with_data(&self, data: Tensor<T>) -> Result<Self> {
    if data.rank() != 3 || data.dims()[..2] != self.data.dims()[..2] {
      return Err(Error::shape("padded data", &self.data.dims()[..2], data.dims()))
    }
    Ok(Self { data, layout: self.layout.clone() })
  }
}


/// Items that ForEach can tell apart as empty.

pub trait Sequence {
  fn seq_len(&self) -> usize;
}

impl<T: Numeric> Sequence for Tensor<T> {
  fn seq_len(&self) -> usize {
    self.len()
  }
}

impl<I> Sequence for Vec<I> {
  fn seq_len(&self) -> usize {
    self.len()
  }
}


fn check_ragged<T: Numeric>(seqs: &[Tensor<T>]) -> Result<usize> {
  let first = seqs.first().ok_or(Error::EmptyBatch("padding a ragged batch"))?;
  if first.rank() != 2 {
    return Err(Error::shape("ragged batch item", &[first.len(), 0], first.dims()))
  }
  let features = first.dim(1);
  for seq in seqs {
    if seq.rank() != 2 || seq.dim(1) != features {
      return Err(Error::shape("ragged batch item", &[seq.len(), features], seq.dims()))
    }
  }
  Ok(features)
}

/// Pad a ragged batch.
///
/// Zero-length sequences are kept as empty columns at the end of the batch.
/// Fails on an empty batch, since the feature width can't be inferred.

pub fn list2padded<T: Numeric>(seqs: &[Tensor<T>]) -> Result<Padded<T>> {
  let lengths: Vec<usize> = seqs.iter().map(|seq| seq.len() ).collect();
  pad_as(seqs, &Layout::from_lengths(&lengths))
}

/// Pad a ragged batch using an existing schedule.
///
/// Used to pad gradients in exactly the order of the forward pass.

pub fn pad_as<T: Numeric>(seqs: &[Tensor<T>], layout: &Layout) -> Result<Padded<T>> {
  let features = check_ragged(seqs)?;
  if seqs.len() != layout.batch_size() {
    return Err(Error::shape("padding batch size", &[layout.batch_size()], &[seqs.len()]))
  }
  let batch = seqs.len();
  let mut data = Tensor::zeros(&[layout.max_length(), batch, features]);
  {
    let raw = data.raw_mut();
    for (col, (&idx, &len)) in layout.indices.iter().zip(&layout.lengths).enumerate() {
      let seq = &seqs[idx];
      if seq.len() != len {
        return Err(Error::shape(format!("sequence {idx} of padded batch"), &[len, features], seq.dims()))
      }
      for (t, row) in seq.raw().chunks(features.max(1)).take(len).enumerate() {
        let start = (t * batch + col) * features;
        raw[start .. start + features].copy_from_slice(row);
      }
    }
  }
  Ok(Padded { data, layout: layout.clone() })
}

/// Restore the ragged batch a [Padded] was created from, in original order.

pub fn padded2list<T: Numeric>(padded: &Padded<T>) -> Result<Vec<Tensor<T>>> {
  let layout = &padded.layout;
  let dims = padded.data.dims();
  let expected = [layout.max_length(), layout.batch_size()];
  if dims.len() != 3 || dims[..2] != expected {
    return Err(Error::shape("padded data", &expected, dims))
  }
  let (batch, features) = (dims[1], dims[2]);
  let raw = padded.data.raw();
  let mut seqs = vec![None; batch];
  for (col, (&idx, &len)) in layout.indices.iter().zip(&layout.lengths).enumerate() {
    let mut data = Vec::with_capacity(len * features);
    for t in 0..len {
      let start = (t * batch + col) * features;
      data.extend_from_slice(&raw[start .. start + features]);
    }
    seqs[idx] = Some(Tensor::new(&[len, features], data));
  }
  seqs.into_iter()
    .map(|seq| seq.ok_or_else(|| Error::Mismatch("padding indices are not a permutation".to_string()) ))
    .collect()
}

/// Reverse every sequence within its own length.
/// Padding stays in place, so applying this twice is the identity.

pub fn reverse_sequences<T: Numeric>(padded: &Padded<T>) -> Padded<T> {
  let batch = padded.layout.batch_size();
  let features = padded.features();
  let src = padded.data.raw();
  let mut data = Tensor::zeros(padded.data.dims());
  {
    let raw = data.raw_mut();
    for (col, &len) in padded.layout.lengths.iter().enumerate() {
      for t in 0..len {
        let from = ((len - 1 - t) * batch + col) * features;
        let to = (t * batch + col) * features;
        raw[to .. to + features].copy_from_slice(&src[from .. from + features]);
      }
    }
  }
  Padded { data, layout: padded.layout.clone() }
}

/// Concatenate arrays along their leading dimension.

pub fn flatten_arrays<T: Numeric>(seqs: &[Tensor<T>]) -> Result<Tensor<T>> {
  let first = seqs.first().ok_or(Error::EmptyBatch("flattening arrays"))?;
  let inner = &first.dims()[1..];
  for seq in seqs {
    if seq.rank() == 0 || &seq.dims()[1..] != inner {
      return Err(Error::shape("flattened array", inner, seq.dims()))
    }
  }
  Ok(Tensor::stack(seqs, inner))
}

/// Split an array along its leading dimension into pieces of `lengths` rows.

pub fn unflatten_arrays<T: Numeric>(flat: &Tensor<T>, lengths: &[usize]) -> Result<Vec<Tensor<T>>> {
  let total: usize = lengths.iter().sum();
  if flat.rank() == 0 || flat.len() != total {
    return Err(Error::shape("unflattened array", &[total], flat.dims()))
  }
  let mut start = 0;
  Ok(lengths.iter().map(|&len| {
    let piece = flat.slice_rows(start .. start + len);
    start += len;
    piece
  }).collect())
}

/// Collapse one level of nesting, recording each group's size.

pub fn flatten<I>(groups: Vec<Vec<I>>) -> (Vec<I>, Vec<usize>) {
  let lengths = groups.iter().map(|group| group.len() ).collect();
  (groups.into_iter().flatten().collect(), lengths)
}

/// Restore the nesting recorded by [flatten].

pub fn unflatten<I>(items: Vec<I>, lengths: &[usize]) -> Result<Vec<Vec<I>>> {
  let total: usize = lengths.iter().sum();
  if items.len() != total {
    return Err(Error::shape("unflattened list", &[total], &[items.len()]))
  }
  let mut items = items.into_iter();
  Ok(lengths.iter()
    .map(|&len| items.by_ref().take(len).collect() )
    .collect())
}
