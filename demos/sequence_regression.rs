// Trains a bidirectional LSTM to predict a running sum over a batch of
// documents, each holding a few sentences of varying length.

// The model sees nested, ragged input. ForEach batches all sentences into a
// single call and with_padded converts them to a padded buffer for the LSTM.

use rand::{ Rng, SeedableRng, rngs::StdRng };

use microlayer::{
  Tensor, Module, Layer, CpuOps,
  layers::{ foreach, with_padded, Lstm, LstmConfig },
  optimize::Adam,
};

fn make_document(rng: &mut StdRng) -> (Vec<Tensor<f32>>, Vec<Tensor<f32>>) {
  let num_sentences = rng.gen_range(1, 4);
  (0..num_sentences).map(|_| {
    let len = rng.gen_range(1, 9);
    let x = Tensor::uniform(&[len, 1], -0.5, 0.5, rng);
    let mut sum = 0.0;
    let y = x.vectorize(|a| { sum += a; sum * 0.5 });
    (x, y)
  }).unzip()
}

fn main() -> microlayer::Result<()> {
  let mut rng = StdRng::seed_from_u64(42);
  let (docs, targets): (Vec<_>, Vec<_>) = (0..16).map(|_| make_document(&mut rng) ).unzip();

  // Each direction contributes half of the output
  let config = LstmConfig::default().with_n_o(1).with_bi(true);
  let mut model = foreach(with_padded(Lstm::new(config, CpuOps::shared())?));
  model.initialize(Some(&docs), None, &mut rng)?;
  let mut optimizer = Adam::with_learning_rate(0.01f32);

  for epoch in 0..200 {
    let (output, backprop) = model.begin_update(&docs)?;

    // Sum outputs of both directions and compare to target
    let mut loss = 0.0;
    let grads = output.iter().zip(&targets).map(|(doc, target)| {
      doc.iter().zip(target).map(|(y, t)| {
        let prediction = y.cols(0..1).add(&y.cols(1..2));
        let diff = prediction.sub(t);
        loss += diff.sqr().sum();
        let grad = diff.scale(2.0);
        Tensor::concat_cols(&[&grad, &grad])
      }).collect()
    }).collect();

    backprop.call(grads)?;
    model.finish_update(&mut optimizer)?;

    if epoch % 20 == 0 {
      println!("Epoch {epoch}: loss {loss:.5}");
    }
  }

  let bytes = model.to_bytes()?;
  println!("Serialized model: {} bytes", bytes.len());
  Ok(())
}
