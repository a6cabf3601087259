use rand::{ RngCore, SeedableRng, rngs::StdRng };

mod node;
mod dump;

pub use node::{ Node, Attr };

use crate::{
  error::Result,
  optimize::UpdateRule,
  scalar::Float,
  tensor::Tensor,
};


/// Single-use backward pass returned by [Layer::forward].
///
/// Maps the gradient of a forward call's outputs (`D`) to the gradient of its
/// inputs (`R`), accumulating parameter gradients on the way. Calling it
/// consumes it. It mutably borrows the layer that produced it, so the layer
/// can't run another forward pass until the context is used or dropped.

pub struct Backprop<'a, D: 'a, R: 'a> {
  callback: Box<dyn FnOnce(D) -> Result<R> + 'a>,
}

impl<'a, D, R> Backprop<'a, D, R> {
  pub fn new(callback: impl FnOnce(D) -> Result<R> + 'a) -> Self {
    Self { callback: Box::new(callback) }
  }

  pub fn call(self, grad: D) -> Result<R> {
    (self.callback)(grad)
  }
}

impl<D, R> std::fmt::Debug for Backprop<'_, D, R> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Backprop")
  }
}


/// Structural half of the layer contract, independent of the
/// layer's input and output types.
///
/// Primitive layers only implement [node](Module::node) and
/// [node_mut](Module::node_mut). Combinators also list their children.

pub trait Module<T: Float> {
  fn node(&self) -> &Node<T>;
  fn node_mut(&mut self) -> &mut Node<T>;

  fn layers(&self) -> Vec<&dyn Module<T>> {
    Vec::new()
  }

  fn layers_mut(&mut self) -> Vec<&mut dyn Module<T>> {
    Vec::new()
  }

  fn name(&self) -> &str {
    self.node().name()
  }

  /// This node followed by all of its descendants, depth first.

  fn nodes(&self) -> Vec<&Node<T>> {
    let mut nodes = vec![self.node()];
    for layer in self.layers() {
      nodes.extend(layer.nodes());
    }
    nodes
  }

  /// Apply `rule` to every parameter of this node and its descendants.

  fn finish_update(&mut self, rule: &mut dyn UpdateRule<T>) -> Result<()> {
    self.node_mut().finish_update(rule)?;
    for layer in self.layers_mut() {
      layer.finish_update(rule)?;
    }
    Ok(())
  }

  fn get_dim(&self, name: &str) -> Result<usize> {
    self.node().get_dim(name)
  }

  fn has_param(&self, name: &str) -> bool {
    self.node().has_param(name)
  }

  fn get_param(&self, name: &str) -> Result<&Tensor<T>> {
    self.node().get_param(name)
  }

  fn set_param(&mut self, name: &str, value: Tensor<T>) -> Result<()> {
    self.node_mut().set_param(name, value)
  }

  fn to_bytes(&self) -> Result<Vec<u8>> {
    dump::to_bytes(self.nodes())
  }

  /// Load parameters, dims and attrs written by [to_bytes](Module::to_bytes)
  /// from a model of the same structure. Nothing is changed if the
  /// structures differ.

  fn from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    let dumps = dump::from_bytes::<T>(bytes)?;
    dump::check(&self.nodes(), &dumps)?;
    let mut dumps = dumps.into_iter();
    dump::restore(self.node_mut(), dumps.next())?;
    for layer in self.layers_mut() {
      dump::load(layer, &mut dumps)?;
    }
    Ok(())
  }
}


/// A computation with typed inputs and outputs and a matching backward pass.

pub trait Layer<T: Float>: Module<T> {
  type Input;
  type Output;

  /// Resolve dims from sample data and allocate parameters,
  /// here and in all children.
  fn initialize(
    &mut self,
    x: Option<&Self::Input>,
    y: Option<&Self::Output>,
    rng: &mut dyn RngCore,
  ) -> Result<()>;

  fn forward(
    &mut self,
    x: &Self::Input,
    is_train: bool,
  ) -> Result<(Self::Output, Backprop<'_, Self::Output, Self::Input>)>;

  fn initialize_seeded(
    &mut self,
    x: Option<&Self::Input>,
    y: Option<&Self::Output>,
    seed: u64,
  ) -> Result<()> {
    self.initialize(x, y, &mut StdRng::seed_from_u64(seed))
  }

  fn predict(&mut self, x: &Self::Input) -> Result<Self::Output> {
    Ok(self.forward(x, false)?.0)
  }

  fn begin_update(&mut self, x: &Self::Input) -> Result<(Self::Output, Backprop<'_, Self::Output, Self::Input>)> {
    self.forward(x, true)
  }
}
