use std::collections::HashMap;

use crate::{
  scalar::Float,
  tensor::Tensor,
};


/// Identifies one parameter of one node across update steps.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamKey {
  pub node: usize,
  pub name: String,
}


/// Parameter update applied by [finish_update](crate::Module::finish_update).
///
/// Receives a parameter and its accumulated gradient and returns the
/// new parameter value together with the gradient to keep, which
/// is usually zero.

pub trait UpdateRule<T: Float> {
  fn update(&mut self, key: &ParamKey, param: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>);
}

impl<T, F> UpdateRule<T> for F
where
  T: Float,
  F: FnMut(&ParamKey, &Tensor<T>, &Tensor<T>) -> (Tensor<T>, Tensor<T>),
{
  fn update(&mut self, key: &ParamKey, param: &Tensor<T>, grad: &Tensor<T>) -> (Tensor<T>, Tensor<T>) {
    self(key, param, grad)
  }
}


/// Stochastic Gradient Descent

#[derive(Debug, Clone)]
pub struct SGD<R: Float> {
  pub learning_rate: R,
}

impl<R: Float> SGD<R> {
  pub fn new(learning_rate: R) -> Self {
    Self { learning_rate }
  }
}

impl<R: Float> UpdateRule<R> for SGD<R> {
  fn update(&mut self, _key: &ParamKey, param: &Tensor<R>, grad: &Tensor<R>) -> (Tensor<R>, Tensor<R>) {
    (param.sub(&grad.scale(self.learning_rate)), Tensor::zeros(grad.dims()))
  }
}


/// Stochastic Gradient Descent with momentum

#[derive(Debug, Clone)]
pub struct Momentum<R: Float> {
  pub learning_rate: R,
  pub momentum: R,
  v: HashMap<ParamKey, Tensor<R>>,
}

impl<R: Float> Momentum<R> {
  pub fn new(learning_rate: R, momentum: R) -> Self {
    Self {
      learning_rate,
      momentum,
      v: HashMap::new(),
    }
  }
}

impl<R: Float> UpdateRule<R> for Momentum<R> {
  fn update(&mut self, key: &ParamKey, param: &Tensor<R>, grad: &Tensor<R>) -> (Tensor<R>, Tensor<R>) {
    let v = self.v.entry(key.clone())
      .or_insert_with(|| Tensor::zeros(param.dims()) );
    *v = v.scale(self.momentum).sub(&grad.scale(self.learning_rate));
    (param.add(v), Tensor::zeros(grad.dims()))
  }
}


/// Adaptive Movement Estimation strategy (ADAM)

#[derive(Debug, Clone)]
pub struct Adam<R: Float> {
  pub learning_rate: R,
  pub beta1: R,
  pub beta2: R,
  pub eps: R,
  m: HashMap<ParamKey, Tensor<R>>,
  v: HashMap<ParamKey, Tensor<R>>,
  steps: HashMap<ParamKey, i32>,
}

impl<R: Float> Adam<R> {
  pub fn new(learning_rate: R, beta1: R, beta2: R) -> Self {
    Self {
      learning_rate,
      beta1,
      beta2,
      eps: R::from(1e-8).unwrap(),
      m: HashMap::new(),
      v: HashMap::new(),
      steps: HashMap::new(),
    }
  }

  pub fn with_learning_rate(learning_rate: R) -> Self {
    Self::new(learning_rate, R::from(0.9).unwrap(), R::from(0.999).unwrap())
  }
}

impl<R: Float> UpdateRule<R> for Adam<R> {
  fn update(&mut self, key: &ParamKey, param: &Tensor<R>, grad: &Tensor<R>) -> (Tensor<R>, Tensor<R>) {
    let (beta1, beta2) = (self.beta1, self.beta2);
    let m = self.m.entry(key.clone()).or_insert_with(|| Tensor::zeros(param.dims()) );
    *m = m.zip(grad, |m, g| m * beta1 + g * (R::one() - beta1) );
    let v = self.v.entry(key.clone()).or_insert_with(|| Tensor::zeros(param.dims()) );
    *v = v.zip(grad, |v, g| v * beta2 + g * g * (R::one() - beta2) );
    let step = self.steps.entry(key.clone()).or_insert(0);
    *step += 1;
    let mt = m.scale(R::one() / (R::one() - beta1.powi(*step)));
    let vt = v.scale(R::one() / (R::one() - beta2.powi(*step)));
    let (rate, eps) = (self.learning_rate, self.eps);
    let change = mt.zip(&vt, |m, v| m * rate / (v.sqrt() + eps) );
    (param.sub(&change), Tensor::zeros(grad.dims()))
  }
}
