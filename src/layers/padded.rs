use rand::RngCore;

use crate::{
  codec::Padded,
  error::Result,
  layers::inherit_dims,
  model::{ Node, Module, Layer, Backprop },
  scalar::Float,
  tensor::Tensor,
};


/// Lets a layer over [Padded] batches accept and return ragged batches.

pub struct WithPadded<T: Float, L> {
  node: Node<T>,
  layer: L,
}

pub fn with_padded<T, L>(layer: L) -> WithPadded<T, L>
where
  T: Float,
  L: Layer<T, Input = Padded<T>, Output = Padded<T>>,
{
  let node = Node::new(format!("with_padded({})", layer.name()), layer.node().ops().clone())
    .with_dim("nO", layer.node().maybe_dim("nO").ok().flatten())
    .with_dim("nI", layer.node().maybe_dim("nI").ok().flatten());
  WithPadded { node, layer }
}

impl<T: Float, L> WithPadded<T, L> {
  pub fn layer(&self) -> &L {
    &self.layer
  }
}

impl<T: Float, L: Module<T>> Module<T> for WithPadded<T, L> {
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

impl<T, L> Layer<T> for WithPadded<T, L>
where
  T: Float,
  L: Layer<T, Input = Padded<T>, Output = Padded<T>>,
{
  type Input = Vec<Tensor<T>>;
  type Output = Vec<Tensor<T>>;

  fn initialize(&mut self, x: Option<&Vec<Tensor<T>>>, y: Option<&Vec<Tensor<T>>>, rng: &mut dyn RngCore) -> Result<()> {
    let ops = self.node.ops().clone();
    let x = x.map(|x| ops.list2padded(x) ).transpose()?;
    let y = y.map(|y| ops.list2padded(y) ).transpose()?;
    self.layer.initialize(x.as_ref(), y.as_ref(), rng)?;
    inherit_dims(&mut self.node, self.layer.node())
  }

  fn forward(&mut self, x: &Vec<Tensor<T>>, is_train: bool) -> Result<(Vec<Tensor<T>>, Backprop<'_, Vec<Tensor<T>>, Vec<Tensor<T>>>)> {
    let ops = self.node.ops().clone();
    let padded = ops.list2padded(x)?;
    let (y, backprop) = self.layer.forward(&padded, is_train)?;
    let y = ops.padded2list(&y)?;
    let layout = padded.layout;
    Ok((y, Backprop::new(move |dy: Vec<Tensor<T>>| {
      let dy = ops.list2padded_as(&dy, &layout)?;
      let dx = backprop.call(dy)?;
      ops.padded2list(&dx)
    })))
  }
}


#[cfg(test)]
mod tests {
  use rand::{ SeedableRng, rngs::StdRng };

  use super::*;
  use crate::{
    error::Error,
    layers::{ Lstm, LstmConfig },
    ops::CpuOps,
  };

  fn ragged(lengths: &[usize], features: usize, seed: u64) -> Vec<Tensor<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    lengths.iter()
      .map(|&len| Tensor::uniform(&[len, features], -1.0, 1.0, &mut rng) )
      .collect()
  }

  fn model() -> WithPadded<f64, Lstm<f64>> {
    let lstm = Lstm::new(LstmConfig::default().with_n_o(3), CpuOps::shared()).unwrap();
    with_padded(lstm)
  }

  #[test]
  fn ragged_in_ragged_out() {
    let mut model = model();
    assert_eq!(model.name(), "with_padded(lstm)");
    let x = ragged(&[2, 5, 0, 1], 4, 0);
    model.initialize_seeded(Some(&x), None, 0).unwrap();
    assert_eq!(model.get_dim("nI").unwrap(), 4);
    assert_eq!(model.get_dim("nO").unwrap(), 3);

    let (y, backprop) = model.forward(&x, true).unwrap();
    let lengths: Vec<_> = y.iter().map(|y| y.dims().to_vec() ).collect();
    assert_eq!(lengths, vec![vec![2, 3], vec![5, 3], vec![0, 3], vec![1, 3]]);
    let dx = backprop.call(ragged(&[2, 5, 0, 1], 3, 1)).unwrap();
    for (dx, x) in dx.iter().zip(&x) {
      assert_eq!(dx.dims(), x.dims());
    }
  }

  #[test]
  fn backward_keeps_forward_order() {
    let mut model = model();
    let x = ragged(&[1, 3], 2, 2);
    model.initialize_seeded(Some(&x), None, 0).unwrap();

    // Gradient only on the short sequence must not reach the long one
    let (_, backprop) = model.forward(&x, true).unwrap();
    let dy = vec![Tensor::ones(&[1, 3]), Tensor::zeros(&[3, 3])];
    let dx = backprop.call(dy).unwrap();
    assert!(dx[0].raw().iter().any(|&g| g != 0.0 ));
    assert!(dx[1].raw().iter().all(|&g| g == 0.0 ));
  }

  #[test]
  fn rejects_foreign_gradient() {
    let mut model = model();
    let x = ragged(&[1, 3], 2, 3);
    model.initialize_seeded(Some(&x), None, 0).unwrap();
    let (_, backprop) = model.forward(&x, true).unwrap();
    assert!(matches!(backprop.call(ragged(&[3, 1], 3, 4)), Err(Error::Shape { .. })));
  }

  #[test]
  fn empty_batch() {
    let mut model = model();
    assert!(matches!(model.initialize_seeded(Some(&vec![]), None, 0), Err(Error::EmptyBatch(_))));
  }
}
