//! Layers and combinators.

mod foreach;
mod padded;
mod lstm;

pub use foreach::{ ForEach, foreach };
pub use padded::{ WithPadded, with_padded };
pub use lstm::{ Lstm, LstmCell, LstmConfig, RecurrentEngine };

use crate::{
  error::Result,
  model::Node,
  scalar::Float,
};


// Adopt the child's input and output widths once it has resolved them
pub(crate) fn inherit_dims<T: Float>(node: &mut Node<T>, child: &Node<T>) -> Result<()> {
  for name in ["nO", "nI"] {
    let declared = node.maybe_dim(name).is_ok();
    if let (true, Ok(Some(value))) = (declared, child.maybe_dim(name)) {
      node.set_dim(name, value)?;
    }
  }
  Ok(())
}
