//! Composable neural network layers over ragged sequence batches.
//! Tiny. Few dependencies. CPU only.
//!
//! # Features
//!
//! - **Closure-based backprop** — Every forward call returns its outputs
//! together with a single-use [Backprop] context. It borrows the layer that
//! produced it, so stale or repeated backward calls don't compile.
//!
//! - **Ragged batches** — The [codec] converts between lists of variable-length
//! sequences and dense, length-sorted padded buffers, losslessly in both directions.
//!
//! - **Combinators** — [foreach](layers::foreach) maps a layer over one more level
//! of nesting, [with_padded](layers::with_padded) lets padded layers consume ragged batches.
//!
//! - **LSTM** — Stacked, optionally bidirectional recurrent layers with dropout,
//! or any other [RecurrentEngine](layers::RecurrentEngine) plugged in instead.
//!
//! - **Optimization** — Includes SGD, momentum and ADAM update rules.
//!
//! # Examples
//!
//! Running an LSTM over nested sequences and taking one training step:
//! ```
//! use microlayer::{
//!   Tensor, Module, Layer, CpuOps,
//!   layers::{ foreach, with_padded, Lstm, LstmConfig },
//!   optimize::SGD,
//! };
//!
//! fn main() -> microlayer::Result<()> {
//!   let lstm = Lstm::new(LstmConfig::default().with_n_o(4), CpuOps::shared())?;
//!   let mut model = foreach(with_padded(lstm));
//!
//!   // Two documents of one and two sentences, three features per token
//!   let docs = vec![
//!     vec![Tensor::<f32>::ones(&[5, 3])],
//!     vec![Tensor::ones(&[2, 3]), Tensor::ones(&[7, 3])],
//!   ];
//!   model.initialize_seeded(Some(&docs), None, 42)?;
//!
//!   let (output, backprop) = model.begin_update(&docs)?;
//!   assert_eq!(output[1][1].dims(), &[7, 4]);
//!
//!   let d_output = output.iter()
//!     .map(|doc| doc.iter().map(|sent| Tensor::ones(sent.dims()) ).collect() )
//!     .collect();
//!   let d_docs = backprop.call(d_output)?;
//!   assert_eq!(d_docs[1][0].dims(), &[2, 3]);
//!
//!   model.finish_update(&mut SGD::new(0.01f32))?;
//!   Ok(())
//! }
//! ```
//!
//! Check the `/demos` folder for a complete training loop.
//!
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)* — Accelerated matrix math using [matrixmultiply] crate.

mod internal;
mod shape;
mod tensor;
mod error;
mod model;

pub mod scalar;
pub mod codec;
pub mod ops;
pub mod optimize;
pub mod layers;

pub use shape::Shape;
pub use tensor::Tensor;
pub use error::{ Error, Result };
pub use model::{ Node, Attr, Module, Layer, Backprop };
pub use ops::{ Ops, CpuOps };
