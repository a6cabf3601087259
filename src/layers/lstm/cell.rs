use std::rc::Rc;

use rand::RngCore;

use crate::{
  codec::{ self, Layout, Padded },
  error::{ Error, Result },
  model::{ Node, Module, Layer, Backprop },
  ops::Ops,
  scalar::Float,
  tensor::Tensor,
};


// Activations of one timestep, kept for the backward pass
struct Step<T: Float> {
  z: Tensor<T>,
  input: Tensor<T>,
  forget: Tensor<T>,
  cell_input: Tensor<T>,
  output: Tensor<T>,
  c_prev: Tensor<T>,
  tanh_c: Tensor<T>,
}


/// One direction of one LSTM level, unrolled over a padded batch.
///
/// Gate rows of `W` are ordered input, forget, cell input, output.
/// Columns are ordered `x_t` first, then `h_{t-1}`. Only the
/// `size_at_t[t]` leading rows of a timestep enter the computation, so
/// finished sequences keep their state at their true last step.
///
/// When the `reverse` attribute is set, sequences are processed back to front
/// within their own lengths and the output is flipped back afterwards.

pub struct LstmCell<T: Float> {
  node: Node<T>,
}

impl<T: Float> LstmCell<T> {
  pub fn new(n_o: Option<usize>, n_i: Option<usize>, reverse: bool, ops: Rc<dyn Ops<T>>) -> Self {
    let node = Node::new("lstm_cell", ops)
      .with_dim("nO", n_o)
      .with_dim("nI", n_i)
      .with_param("W")
      .with_param("b")
      .with_param("initial_hiddens")
      .with_param("initial_cells")
      .with_attr("reverse", reverse);
    Self { node }
  }
}

impl<T: Float> Module<T> for LstmCell<T> {
  fn node(&self) -> &Node<T> {
    &self.node
  }

  fn node_mut(&mut self) -> &mut Node<T> {
    &mut self.node
  }
}

impl<T: Float> Layer<T> for LstmCell<T> {
  type Input = Padded<T>;
  type Output = Padded<T>;

  fn initialize(&mut self, x: Option<&Padded<T>>, y: Option<&Padded<T>>, rng: &mut dyn RngCore) -> Result<()> {
    if let Some(x) = x {
      self.node.set_dim("nI", x.features())?;
    }
    if let Some(y) = y {
      self.node.set_dim("nO", y.features())?;
    }
    let n_o = self.node.get_dim("nO")?;
    let n_i = self.node.get_dim("nI")?;
    self.node.alloc_param("W", Tensor::glorot_uniform(&[n_o * 4, n_i + n_o], rng))?;
    self.node.alloc_param("b", Tensor::zeros(&[n_o * 4]))?;
    self.node.alloc_param("initial_hiddens", Tensor::zeros(&[n_o]))?;
    self.node.alloc_param("initial_cells", Tensor::zeros(&[n_o]))?;
    log::debug!("initialized {} with nO={n_o} nI={n_i}", self.node.name());
    Ok(())
  }

  fn forward(&mut self, x: &Padded<T>, _is_train: bool) -> Result<(Padded<T>, Backprop<'_, Padded<T>, Padded<T>>)> {
    let n_o = self.node.get_dim("nO")?;
    let n_i = self.node.get_dim("nI")?;
    let dims = x.data.dims();
    if dims.len() != 3 || dims[2] != n_i {
      return Err(Error::shape(format!("input of '{}'", self.node.name()), &[x.layout.max_length(), x.layout.batch_size(), n_i], dims))
    }
    let reverse = self.node.get_bool("reverse")?;
    let ops = self.node.ops().clone();
    let w = self.node.get_param("W")?;
    let b = self.node.get_param("b")?;

    let input = if reverse { codec::reverse_sequences(x) } else { x.clone() };
    let (max_length, batch) = (dims[0], dims[1]);
    log::trace!("{} forward over {max_length} steps of {batch} sequences", self.node.name());

    let mut out = ops.alloc(&[max_length, batch, n_o]);
    let mut steps = Vec::with_capacity(max_length);
    let mut h = self.node.get_param("initial_hiddens")?.broadcast_rows(batch);
    let mut c = self.node.get_param("initial_cells")?.broadcast_rows(batch);
    for t in 0..max_length {
      let n = input.size_at_t()[t];
      let h_prev = h.slice_rows(0..n);
      let c_prev = c.slice_rows(0..n);
      let z = Tensor::concat_cols(&[&input.step(t), &h_prev]);
      let gates = ops.gemm(&z, w, false, true).add(&b.broadcast_rows(n));
      let input_gate = ops.sigmoid(&gates.cols(0..n_o));
      let forget = ops.sigmoid(&gates.cols(n_o..n_o * 2));
      let cell_input = ops.tanh(&gates.cols(n_o * 2..n_o * 3));
      let output = ops.sigmoid(&gates.cols(n_o * 3..n_o * 4));
      c = forget.mul(&c_prev).add(&input_gate.mul(&cell_input));
      let tanh_c = ops.tanh(&c);
      h = output.mul(&tanh_c);
      out.set_block(t, &h);
      steps.push(Step { z, input: input_gate, forget, cell_input, output, c_prev, tanh_c });
    }

    let layout = input.layout;
    let y = Padded { data: out, layout: layout.clone() };
    let y = if reverse { codec::reverse_sequences(&y) } else { y };
    let out_dims = y.data.dims().to_vec();

    let node = &mut self.node;
    Ok((y, Backprop::new(move |dy: Padded<T>| {
      if dy.layout != layout {
        return Err(Error::shape(format!("gradient lengths of '{}'", node.name()), &layout.lengths, &dy.layout.lengths))
      }
      if dy.data.dims() != out_dims.as_slice() {
        return Err(Error::shape(format!("gradient of '{}'", node.name()), &out_dims, dy.data.dims()))
      }
      log::trace!("{} backward", node.name());
      let dy = if reverse { codec::reverse_sequences(&dy) } else { dy };
      let w = node.get_param("W")?;
      let grads = backprop_steps(&*ops, &steps, &dy, w, &layout, n_i, n_o);
      let dx = Padded { data: grads.dx, layout };
      let dx = if reverse { codec::reverse_sequences(&dx) } else { dx };
      node.inc_grad("W", &grads.dw)?;
      node.inc_grad("b", &grads.db)?;
      node.inc_grad("initial_hiddens", &grads.dh0)?;
      node.inc_grad("initial_cells", &grads.dc0)?;
      Ok(dx)
    })))
  }
}


struct Grads<T: Float> {
  dx: Tensor<T>,
  dw: Tensor<T>,
  db: Tensor<T>,
  dh0: Tensor<T>,
  dc0: Tensor<T>,
}

// Backpropagation through time, last step first
fn backprop_steps<T: Float>(
  ops: &dyn Ops<T>,
  steps: &[Step<T>],
  dy: &Padded<T>,
  w: &Tensor<T>,
  layout: &Layout,
  n_i: usize,
  n_o: usize,
) -> Grads<T> {
  let (max_length, batch) = (layout.max_length(), layout.batch_size());
  let mut dx = ops.alloc(&[max_length, batch, n_i]);
  let mut dw = Tensor::zeros(w.dims());
  let mut db = Tensor::zeros(&[n_o * 4]);
  let mut dh0 = Tensor::zeros(&[n_o]);
  let mut dc0 = Tensor::zeros(&[n_o]);
  let mut dh_next = Tensor::zeros(&[0, n_o]);
  let mut dc_next = Tensor::zeros(&[0, n_o]);
  for t in (0..steps.len()).rev() {
    let step = &steps[t];
    let n = step.z.len();
    let dh = dy.step(t).add(&pad_rows(&dh_next, n));
    let dc = pad_rows(&dc_next, n)
      .add(&ops.backprop_tanh(&dh.mul(&step.output), &step.tanh_c));
    let d_input = ops.backprop_sigmoid(&dc.mul(&step.cell_input), &step.input);
    let d_forget = ops.backprop_sigmoid(&dc.mul(&step.c_prev), &step.forget);
    let d_cell_input = ops.backprop_tanh(&dc.mul(&step.input), &step.cell_input);
    let d_output = ops.backprop_sigmoid(&dh.mul(&step.tanh_c), &step.output);
    let d_gates = Tensor::concat_cols(&[&d_input, &d_forget, &d_cell_input, &d_output]);
    dw += &ops.gemm(&d_gates, &step.z, true, false);
    db += &d_gates.sum_rows();
    let dz = ops.gemm(&d_gates, w, false, false);
    dx.set_block(t, &dz.cols(0..n_i));
    dh_next = dz.cols(n_i..n_i + n_o);
    dc_next = dc.mul(&step.forget);
    if t == 0 {
      dh0 = dh_next.sum_rows();
      dc0 = dc_next.sum_rows();
    }
  }
  Grads { dx, dw, db, dh0, dc0 }
}

// Sequences that ended after this step receive no gradient from later steps
fn pad_rows<T: Float>(tensor: &Tensor<T>, n: usize) -> Tensor<T> {
  if tensor.len() >= n {
    tensor.slice_rows(0..n)
  } else {
    let missing = Tensor::zeros(&[n - tensor.len(), tensor.dim(1)]);
    Tensor::stack(&[tensor.clone(), missing], &[tensor.dim(1)])
  }
}
