use std::rc::Rc;

use rand::{ RngCore, SeedableRng, rngs::StdRng };
use serde::{ Serialize, Deserialize };

mod cell;

pub use cell::LstmCell;

use crate::{
  codec::Padded,
  error::{ Error, Result },
  layers::inherit_dims,
  model::{ Node, Module, Layer, Backprop },
  ops::Ops,
  scalar::Float,
  tensor::Tensor,
};


/// Structured configuration of an [Lstm].
///
/// `n_o` is the hidden width of one direction. A bidirectional layer
/// outputs `2 * n_o` features.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmConfig {
  pub n_o: Option<usize>,
  pub n_i: Option<usize>,
  pub depth: usize,
  pub bi: bool,
  pub dropout: f64,
}

impl Default for LstmConfig {
  fn default() -> Self {
    Self {
      n_o: None,
      n_i: None,
      depth: 1,
      bi: false,
      dropout: 0.0,
    }
  }
}

impl LstmConfig {
  pub fn with_n_o(mut self, n_o: usize) -> Self {
    self.n_o = Some(n_o);
    self
  }

  pub fn with_n_i(mut self, n_i: usize) -> Self {
    self.n_i = Some(n_i);
    self
  }

  pub fn with_depth(mut self, depth: usize) -> Self {
    self.depth = depth;
    self
  }

  pub fn with_bi(mut self, bi: bool) -> Self {
    self.bi = bi;
    self
  }

  pub fn with_dropout(mut self, dropout: f64) -> Self {
    self.dropout = dropout;
    self
  }

  pub fn directions(&self) -> usize {
    if self.bi { 2 } else { 1 }
  }

  pub fn validate(&self) -> Result<()> {
    if self.depth == 0 {
      return Err(Error::Config("LSTM depth must be at least 1".to_string()))
    }
    if !(0.0..1.0).contains(&self.dropout) {
      return Err(Error::Config(format!("dropout must lie in [0, 1), got {}", self.dropout)))
    }
    if self.n_o == Some(0) {
      return Err(Error::Config("LSTM width must be positive".to_string()))
    }
    Ok(())
  }
}


/// A recurrent implementation the [Lstm] layer can hand its
/// work to instead of running its own cells.

pub trait RecurrentEngine<T: Float>: Layer<T, Input = Padded<T>, Output = Padded<T>> {
  fn as_module(&self) -> &dyn Module<T>;
  fn as_module_mut(&mut self) -> &mut dyn Module<T>;
}

impl<T, L> RecurrentEngine<T> for L
where
  T: Float,
  L: Layer<T, Input = Padded<T>, Output = Padded<T>>,
{
  fn as_module(&self) -> &dyn Module<T> {
    self
  }

  fn as_module_mut(&mut self) -> &mut dyn Module<T> {
    self
  }
}


enum Engine<T: Float> {
  // One cell per level and direction, level-major
  Native(Vec<LstmCell<T>>),
  External(Box<dyn RecurrentEngine<T>>),
}

// Backward state of one stacked level
struct Level<'a, T: Float> {
  backprops: Vec<Backprop<'a, Padded<T>, Padded<T>>>,
  mask: Option<Tensor<T>>,
  input_dims: Vec<usize>,
}


/// Stacked, optionally bidirectional LSTM over padded batches.
///
/// Wrap it with [with_padded](crate::layers::with_padded) to feed it
/// ragged batches.

pub struct Lstm<T: Float> {
  node: Node<T>,
  engine: Engine<T>,
  rng: StdRng,
}

impl<T: Float> Lstm<T> {
  pub fn new(config: LstmConfig, ops: Rc<dyn Ops<T>>) -> Result<Self> {
    config.validate()?;
    let dirs = config.directions();
    let mut cells = Vec::with_capacity(config.depth * dirs);
    for level in 0..config.depth {
      let n_i = if level == 0 { config.n_i } else { config.n_o.map(|n_o| n_o * dirs ) };
      for dir in 0..dirs {
        cells.push(LstmCell::new(config.n_o, n_i, dir == 1, ops.clone()));
      }
    }
    Ok(Self {
      node: Self::make_node(&config, ops),
      engine: Engine::Native(cells),
      rng: StdRng::seed_from_u64(0),
    })
  }

  /// Delegate all work to `engine`.
  ///
  /// Dropout, bidirectionality and stacking are features of the native
  /// cells and are rejected here instead of being ignored.

  pub fn with_engine(config: LstmConfig, engine: Box<dyn RecurrentEngine<T>>, ops: Rc<dyn Ops<T>>) -> Result<Self> {
    config.validate()?;
    if config.dropout > 0.0 {
      return Err(Error::NotImplemented("dropout with a delegated LSTM engine".to_string()))
    }
    if config.bi {
      return Err(Error::NotImplemented("bidirectional delegated LSTM engine".to_string()))
    }
    if config.depth != 1 {
      return Err(Error::NotImplemented(format!("delegated LSTM engine with depth {}", config.depth)))
    }
    Ok(Self {
      node: Self::make_node(&config, ops),
      engine: Engine::External(engine),
      rng: StdRng::seed_from_u64(0),
    })
  }

  fn make_node(config: &LstmConfig, ops: Rc<dyn Ops<T>>) -> Node<T> {
    Node::new("lstm", ops)
      .with_dim("nO", config.n_o.map(|n_o| n_o * config.directions() ))
      .with_dim("nI", config.n_i)
      .with_attr("depth", config.depth)
      .with_attr("bi", config.bi)
      .with_attr("dropout", config.dropout)
  }

  pub fn is_delegated(&self) -> bool {
    matches!(self.engine, Engine::External(_))
  }
}

impl<T: Float> Module<T> for Lstm<T> {
  fn node(&self) -> &Node<T> {
    &self.node
  }

  fn node_mut(&mut self) -> &mut Node<T> {
    &mut self.node
  }

  fn layers(&self) -> Vec<&dyn Module<T>> {
    match &self.engine {
      Engine::Native(cells) => cells.iter().map(|cell| cell as &dyn Module<T> ).collect(),
      Engine::External(engine) => vec![engine.as_module()],
    }
  }

  fn layers_mut(&mut self) -> Vec<&mut dyn Module<T>> {
    match &mut self.engine {
      Engine::Native(cells) => cells.iter_mut().map(|cell| cell as &mut dyn Module<T> ).collect(),
      Engine::External(engine) => vec![engine.as_module_mut()],
    }
  }
}

impl<T: Float> Layer<T> for Lstm<T> {
  type Input = Padded<T>;
  type Output = Padded<T>;

  fn initialize(&mut self, x: Option<&Padded<T>>, y: Option<&Padded<T>>, rng: &mut dyn RngCore) -> Result<()> {
    // Nothing is written to this node before its children accepted the dims
    let n_i = match x {
      Some(x) => Some(x.features()),
      None => self.node.maybe_dim("nI")?,
    };
    let width = match y {
      Some(y) => Some(y.features()),
      None => self.node.maybe_dim("nO")?,
    };
    let dirs = if self.node.get_bool("bi")? { 2 } else { 1 };
    match &mut self.engine {
      Engine::Native(cells) => {
        let unresolved = |dim: &str| Error::UnresolvedDim { node: self.node.name().to_string(), dim: dim.to_string() };
        let n_i = n_i.ok_or_else(|| unresolved("nI") )?;
        let width = width.ok_or_else(|| unresolved("nO") )?;
        if width % dirs != 0 {
          return Err(Error::Config(format!("bidirectional LSTM needs an even output width, got {width}")))
        }
        let n_o = width / dirs;
        let n_in = |i: usize| if i < dirs { n_i } else { width };
        for (i, cell) in cells.iter().enumerate() {
          cell.node().check_dim("nI", n_in(i))?;
          cell.node().check_dim("nO", n_o)?;
        }
        for (i, cell) in cells.iter_mut().enumerate() {
          cell.node_mut().set_dim("nI", n_in(i))?;
          cell.node_mut().set_dim("nO", n_o)?;
          cell.initialize(None, None, rng)?;
        }
        self.node.set_dim("nI", n_i)?;
        self.node.set_dim("nO", width)?;
      },
      Engine::External(engine) => {
        for (name, value) in [("nO", width), ("nI", n_i)] {
          let unresolved = matches!(engine.node().maybe_dim(name), Ok(None));
          if let (Some(value), true) = (value, unresolved) {
            engine.node_mut().set_dim(name, value)?;
          }
        }
        engine.initialize(x, y, rng)?;
        for (name, value) in [("nO", width), ("nI", n_i)] {
          if let Some(value) = value {
            self.node.set_dim(name, value)?;
          }
        }
        inherit_dims(&mut self.node, engine.node())?;
      },
    }
    self.rng = StdRng::seed_from_u64(rng.next_u64());
    log::debug!("initialized {} with nO={:?} nI={:?}",
      self.node.name(), self.node.maybe_dim("nO")?, self.node.maybe_dim("nI")?);
    Ok(())
  }

  fn forward(&mut self, x: &Padded<T>, is_train: bool) -> Result<(Padded<T>, Backprop<'_, Padded<T>, Padded<T>>)> {
    let cells = match &mut self.engine {
      Engine::External(engine) => return engine.forward(x, is_train),
      Engine::Native(cells) => cells,
    };
    let dirs = if self.node.get_bool("bi")? { 2 } else { 1 };
    let n_o = self.node.get_dim("nO")? / dirs;
    let dropout = self.node.get_float("dropout")?;
    let drop = T::from(dropout).ok_or_else(|| Error::Config(format!("dropout {dropout} is not representable")) )?;
    log::trace!("{} forward, training: {is_train}", self.node.name());

    let layout = x.layout.clone();
    let mut levels = Vec::with_capacity(cells.len() / dirs);
    let mut h = x.clone();
    for cells in cells.chunks_mut(dirs) {
      let input_dims = h.data.dims().to_vec();
      let mut outputs = Vec::with_capacity(dirs);
      let mut backprops = Vec::with_capacity(dirs);
      for cell in cells.iter_mut() {
        let (y, backprop) = cell.forward(&h, is_train)?;
        outputs.push(y.data);
        backprops.push(backprop);
      }
      let mut data = Tensor::concat_cols(&outputs.iter().collect::<Vec<_>>());
      let mask = if is_train && dropout > 0.0 {
        let mask = Tensor::bernoulli(data.dims(), drop, &mut self.rng);
        data = data.mul(&mask);
        Some(mask)
      } else {
        None
      };
      levels.push(Level { backprops, mask, input_dims });
      h = Padded { data, layout: layout.clone() };
    }

    let out_dims = h.data.dims().to_vec();
    Ok((h, Backprop::new(move |dy: Padded<T>| {
      if dy.layout != layout {
        return Err(Error::shape("gradient lengths of 'lstm'", &layout.lengths, &dy.layout.lengths))
      }
      if dy.data.dims() != out_dims.as_slice() {
        return Err(Error::shape("gradient of 'lstm'", &out_dims, dy.data.dims()))
      }
      let mut grad = dy.data;
      for level in levels.into_iter().rev() {
        if let Some(mask) = &level.mask {
          grad = grad.mul(mask);
        }
        let mut dx = Tensor::zeros(&level.input_dims);
        for (dir, backprop) in level.backprops.into_iter().enumerate() {
          let part = Padded { data: grad.cols(dir * n_o..(dir + 1) * n_o), layout: layout.clone() };
          dx += &backprop.call(part)?.data;
        }
        grad = dx;
      }
      Ok(Padded { data: grad, layout })
    })))
  }
}


#[cfg(test)]
mod tests {
  use rand::{ SeedableRng, rngs::StdRng };

  use super::*;
  use crate::{ codec, ops::CpuOps, layers::{ with_padded, WithPadded } };

  fn ragged(lengths: &[usize], features: usize, seed: u64) -> Padded<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let seqs: Vec<_> = lengths.iter()
      .map(|&len| Tensor::uniform(&[len, features], -1.0, 1.0, &mut rng) )
      .collect();
    codec::list2padded(&seqs).unwrap()
  }

  #[test]
  fn param_shapes() {
    for n_o in [1, 2, 7, 9] {
      for n_i in [1, 6] {
        let config = LstmConfig::default().with_n_o(n_o).with_n_i(n_i);
        let mut lstm = Lstm::<f32>::new(config, CpuOps::shared()).unwrap();
        lstm.initialize_seeded(None, None, 0).unwrap();
        let cell = lstm.layers()[0];
        assert_eq!(cell.get_param("W").unwrap().dims(), &[4 * n_o, n_o + n_i]);
        assert_eq!(cell.get_param("b").unwrap().dims(), &[4 * n_o]);
        assert_eq!(cell.get_param("initial_hiddens").unwrap().dims(), &[n_o]);
        assert_eq!(cell.get_param("initial_cells").unwrap().dims(), &[n_o]);
        assert_eq!(cell.get_param("b").unwrap(), &Tensor::zeros(&[4 * n_o]));
      }
    }
  }

  #[test]
  fn infers_input_width() {
    let mut lstm = Lstm::<f64>::new(LstmConfig::default().with_n_o(3), CpuOps::shared()).unwrap();
    assert!(matches!(lstm.initialize_seeded(None, None, 0), Err(Error::UnresolvedDim { .. })));
    let x = ragged(&[2, 4], 5, 0);
    lstm.initialize_seeded(Some(&x), None, 0).unwrap();
    assert_eq!(lstm.get_dim("nI").unwrap(), 5);
    assert_eq!(lstm.predict(&x).unwrap().data.dims(), &[4, 2, 3]);
  }

  #[test]
  fn bidirectional_stack() {
    let config = LstmConfig::default().with_n_o(3).with_n_i(4).with_bi(true).with_depth(2);
    let mut lstm = Lstm::<f64>::new(config, CpuOps::shared()).unwrap();
    lstm.initialize_seeded(None, None, 1).unwrap();
    assert_eq!(lstm.get_dim("nO").unwrap(), 6);
    assert_eq!(lstm.layers().len(), 4);
    assert_eq!(lstm.layers()[1].node().get_bool("reverse").unwrap(), true);
    assert_eq!(lstm.layers()[2].get_param("W").unwrap().dims(), &[12, 9]);

    let x = ragged(&[3, 0, 5], 4, 2);
    let (y, backprop) = lstm.forward(&x, true).unwrap();
    assert_eq!(y.data.dims(), &[5, 3, 6]);
    let dx = backprop.call(ragged(&[3, 0, 5], 6, 3)).unwrap();
    assert_eq!(dx.data.dims(), x.data.dims());
    assert_eq!(dx.layout, x.layout);
  }

  #[test]
  fn stacked_gradients() {
    let eps = 1e-6;
    let config = LstmConfig::default().with_n_o(2).with_n_i(3).with_bi(true).with_depth(2);
    let mut lstm = Lstm::<f64>::new(config, CpuOps::shared()).unwrap();
    lstm.initialize_seeded(None, None, 3).unwrap();
    let x = ragged(&[2, 4, 1], 3, 4);
    let weights = ragged(&[2, 4, 1], 4, 5);
    let (_, backprop) = lstm.forward(&x, true).unwrap();
    let dx = backprop.call(weights.clone()).unwrap();
    for i in 0..x.data.size() {
      let mut plus = x.clone();
      plus.data.raw_mut()[i] += eps;
      let mut minus = x.clone();
      minus.data.raw_mut()[i] -= eps;
      let up = lstm.predict(&plus).unwrap().data.mul(&weights.data).sum();
      let down = lstm.predict(&minus).unwrap().data.mul(&weights.data).sum();
      let numeric = (up - down) / (2.0 * eps);
      assert!((numeric - dx.data.raw()[i]).abs() < 1e-6, "dx[{i}]: {numeric} vs {}", dx.data.raw()[i]);
    }
  }

  #[test]
  fn rejected_resize_changes_nothing() {
    let mut model = with_padded(Lstm::<f64>::new(LstmConfig::default().with_n_o(2), CpuOps::shared()).unwrap());
    let x = vec![Tensor::ones(&[3, 4]), Tensor::ones(&[1, 4])];
    model.initialize_seeded(Some(&x), None, 0).unwrap();
    let weights = model.layer().layers()[0].get_param("W").unwrap().clone();

    let wider = vec![Tensor::ones(&[2, 5])];
    assert!(matches!(model.initialize_seeded(Some(&wider), None, 1), Err(Error::Shape { .. })));
    for node in model.nodes() {
      assert_eq!(node.get_dim("nI").unwrap(), 4, "{}", node.name());
      assert_eq!(node.get_dim("nO").unwrap(), 2, "{}", node.name());
    }
    assert_eq!(model.layer().layers()[0].get_param("W").unwrap(), &weights);
    assert_eq!(model.predict(&x).unwrap()[0].dims(), &[3, 2]);
  }

  #[test]
  fn reinitialize_keeps_shapes() {
    const PARAMS: [&str; 4] = ["W", "b", "initial_hiddens", "initial_cells"];
    let config = LstmConfig::default().with_n_o(2).with_n_i(2).with_bi(true).with_depth(2);
    let mut model = with_padded(Lstm::<f64>::new(config, CpuOps::shared()).unwrap());
    let shapes = |model: &WithPadded<f64, Lstm<f64>>| -> Vec<Vec<usize>> {
      model.layer().layers().iter()
        .flat_map(|cell| PARAMS.iter().map(move |name| cell.get_param(name).unwrap().dims().to_vec() ))
        .collect()
    };
    model.initialize_seeded(None, None, 0).unwrap();
    let before = shapes(&model);

    let x = vec![Tensor::ones(&[3, 2]), Tensor::ones(&[1, 2])];
    let (y, backprop) = model.begin_update(&x).unwrap();
    backprop.call(y.iter().map(|y| Tensor::ones(y.dims()) ).collect()).unwrap();
    assert!(model.layer().layers()[0].node().get_grad("W").unwrap().raw().iter().any(|&g| g != 0.0 ));

    model.initialize_seeded(Some(&x), None, 1).unwrap();
    assert_eq!(shapes(&model), before);
    assert_eq!(model.get_dim("nO").unwrap(), 4);
    for cell in model.layer().layers() {
      for name in PARAMS {
        let grad = cell.node().get_grad(name).unwrap();
        assert_eq!(grad, &Tensor::zeros(grad.dims()));
      }
    }
  }

  #[test]
  fn dropout_only_while_training() {
    let config = LstmConfig::default().with_n_o(4).with_n_i(3).with_dropout(0.5);
    let mut lstm = Lstm::<f64>::new(config, CpuOps::shared()).unwrap();
    lstm.initialize_seeded(None, None, 4).unwrap();
    let x = ragged(&[6, 3], 3, 6);
    let clean = lstm.predict(&x).unwrap();
    assert_eq!(lstm.predict(&x).unwrap(), clean);

    let (noisy, backprop) = lstm.forward(&x, true).unwrap();
    let mut dropped = 0;
    for (&a, &b) in noisy.data.raw().iter().zip(clean.data.raw()) {
      if a == 0.0 && b != 0.0 { dropped += 1 }
      assert!(a == 0.0 || (a - 2.0 * b).abs() < 1e-12);
    }
    assert!(dropped > 0);

    let ones = Padded { data: Tensor::ones(noisy.data.dims()), layout: noisy.layout.clone() };
    assert_eq!(backprop.call(ones).unwrap().data.dims(), x.data.dims());
  }

  #[test]
  fn delegated_engine() {
    let ops = CpuOps::shared::<f64>();
    let engine = || Box::new(LstmCell::new(Some(2), Some(3), false, ops.clone())) as Box<dyn RecurrentEngine<f64>>;
    let config = LstmConfig::default().with_n_o(2).with_n_i(3);

    for rejected in [
      config.clone().with_dropout(0.2),
      config.clone().with_bi(true),
      config.clone().with_depth(3),
    ] {
      assert!(matches!(Lstm::with_engine(rejected, engine(), ops.clone()), Err(Error::NotImplemented(_))));
    }

    let mut lstm = Lstm::with_engine(config.clone(), engine(), ops.clone()).unwrap();
    assert!(lstm.is_delegated());
    lstm.initialize_seeded(None, None, 5).unwrap();
    assert_eq!(lstm.layers()[0].name(), "lstm_cell");

    let mut native = Lstm::new(config, ops.clone()).unwrap();
    native.initialize_seeded(None, None, 5).unwrap();
    let x = ragged(&[3, 2], 3, 7);
    assert_eq!(lstm.predict(&x).unwrap(), native.predict(&x).unwrap());
  }

  #[test]
  fn config() {
    let config: LstmConfig = serde_json::from_str(r#"{ "n_o": 8, "bi": true, "dropout": 0.25 }"#).unwrap();
    assert_eq!(config, LstmConfig::default().with_n_o(8).with_bi(true).with_dropout(0.25));
    assert_eq!(config.depth, 1);
    assert!(config.validate().is_ok());
    assert!(matches!(config.clone().with_depth(0).validate(), Err(Error::Config(_))));
    assert!(matches!(config.clone().with_dropout(1.0).validate(), Err(Error::Config(_))));
    assert!(matches!(config.clone().with_dropout(-0.1).validate(), Err(Error::Config(_))));
    assert!(matches!(config.with_n_o(0).validate(), Err(Error::Config(_))));
    assert!(matches!(Lstm::<f32>::new(LstmConfig::default().with_depth(0), CpuOps::shared()), Err(Error::Config(_))));
  }
}
