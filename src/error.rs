use thiserror::Error;


/// Failures surfaced by layer construction, initialization and execution.
///
/// Every failure is a deterministic function of its inputs. Nothing is
/// retried, and a failing forward or backward call leaves gradients untouched.

#[derive(Debug, Error)]
pub enum Error {
  #[error("cannot infer dimension '{dim}' of '{node}': no input supplied and no child provides it")]
  UnresolvedDim { node: String, dim: String },

  #[error("'{node}' has no {kind} named '{name}'")]
  Unknown { node: String, kind: &'static str, name: String },

  #[error("parameter '{name}' of '{node}' is declared but not allocated")]
  Unallocated { node: String, name: String },

  #[error("attribute '{name}' of '{node}' is not a {expected}")]
  AttrType { node: String, name: String, expected: &'static str },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("not implemented: {0}")]
  NotImplemented(String),

  #[error("{0} requires at least one non-empty item")]
  EmptyBatch(&'static str),

  #[error("shape mismatch in {context}: expected {expected:?}, found {found:?}")]
  Shape { context: String, expected: Vec<usize>, found: Vec<usize> },

  #[error("model data does not fit this model: {0}")]
  Mismatch(String),

  #[error("failed to (de)serialize model: {0}")]
  Serialize(#[from] postcard::Error),
}

impl Error {
  pub(crate) fn shape(context: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
    Error::Shape {
      context: context.into(),
      expected: expected.to_vec(),
      found: found.to_vec(),
    }
  }
}


pub type Result<T> = std::result::Result<T, Error>;
