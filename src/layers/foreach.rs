use rand::RngCore;

use crate::{
  codec::{ self, Sequence },
  error::{ Error, Result },
  layers::inherit_dims,
  model::{ Node, Module, Layer, Backprop },
  scalar::Float,
};


/// Maps a layer over one extra level of nesting.
///
/// The inner items of all groups are batched into a single call of the
/// wrapped layer. Empty inner items are left out of that call. Their outputs
/// are dropped from the result, while the gradient returned for them is the
/// empty item itself, so input gradients mirror the input nesting exactly.

pub struct ForEach<T: Float, L> {
  node: Node<T>,
  layer: L,
}

pub fn foreach<T: Float, L: Module<T>>(layer: L) -> ForEach<T, L> {
  let node = Node::new(format!("foreach({})", layer.name()), layer.node().ops().clone())
    .with_dim("nO", layer.node().maybe_dim("nO").ok().flatten())
    .with_dim("nI", layer.node().maybe_dim("nI").ok().flatten());
  ForEach { node, layer }
}

impl<T: Float, L> ForEach<T, L> {
  pub fn layer(&self) -> &L {
    &self.layer
  }
}

impl<T: Float, L: Module<T>> Module<T> for ForEach<T, L> {
  fn node(&self) -> &Node<T> {
    &self.node
  }

  fn node_mut(&mut self) -> &mut Node<T> {
    &mut self.node
  }

  fn layers(&self) -> Vec<&dyn Module<T>> {
    vec![&self.layer as &dyn Module<T>]
  }

  fn layers_mut(&mut self) -> Vec<&mut dyn Module<T>> {
    vec![&mut self.layer as &mut dyn Module<T>]
  }
}

fn first_item<I: Sequence>(groups: &[Vec<I>]) -> Option<&I> {
  groups.iter().flatten().find(|item| item.seq_len() > 0 )
}

impl<T, L, X, Y> Layer<T> for ForEach<T, L>
where
  T: Float,
  L: Layer<T, Input = Vec<X>, Output = Vec<Y>>,
  X: Sequence + Clone,
  Y: Sequence + Clone,
{
  type Input = Vec<Vec<X>>;
  type Output = Vec<Vec<Y>>;

  /// Initialize the wrapped layer from the first non-empty inner item.

  fn initialize(&mut self, x: Option<&Vec<Vec<X>>>, y: Option<&Vec<Vec<Y>>>, rng: &mut dyn RngCore) -> Result<()> {
    let x = x.and_then(|x| first_item(x) ).map(|item| vec![item.clone()] );
    let y = y.and_then(|y| first_item(y) ).map(|item| vec![item.clone()] );
    self.layer.initialize(x.as_ref(), y.as_ref(), rng)?;
    inherit_dims(&mut self.node, self.layer.node())
  }

  fn forward(&mut self, x: &Vec<Vec<X>>, is_train: bool) -> Result<(Vec<Vec<Y>>, Backprop<'_, Vec<Vec<Y>>, Vec<Vec<X>>>)> {
    let mut groups = Vec::with_capacity(x.len());
    let mut empties = Vec::with_capacity(x.len());
    for group in x {
      let (kept, dropped): (Vec<_>, Vec<_>) = group.iter().cloned().enumerate()
        .partition(|(_, item)| item.seq_len() > 0 );
      groups.push(kept.into_iter().map(|(_, item)| item ).collect::<Vec<_>>());
      empties.push(dropped);
    }
    let (flat, lengths) = codec::flatten(groups);
    if flat.is_empty() {
      return Err(Error::EmptyBatch("foreach"))
    }
    log::trace!("{} forward over {} items in {} groups", self.node.name(), flat.len(), lengths.len());
    let (y, backprop) = self.layer.forward(&flat, is_train)?;
    let y = codec::unflatten(y, &lengths)?;

    Ok((y, Backprop::new(move |dy: Vec<Vec<Y>>| {
      let sizes: Vec<usize> = dy.iter().map(Vec::len).collect();
      if sizes != lengths {
        return Err(Error::shape("foreach gradient groups", &lengths, &sizes))
      }
      let (dy, _) = codec::flatten(dy);
      let dx = codec::unflatten(backprop.call(dy)?, &lengths)?;
      Ok(dx.into_iter().zip(empties).map(|(mut group, dropped)| {
        for (i, item) in dropped {
          group.insert(i, item);
        }
        group
      }).collect())
    })))
  }
}
