use crate::{
  tensor::Tensor,
  scalar::Real,
};


impl<T: Real> Tensor<T> {
  pub fn sigmoid(&self) -> Self {
    self.vectorize(|a| T::one() / (T::one() + (-a).exp()) )
  }

  pub fn tanh(&self) -> Self {
    self.vectorize(|a| a.tanh() )
  }

  /// Chain `grad` through a sigmoid given its output `self`.

  pub fn sigmoid_backward(&self, grad: &Self) -> Self {
    self.zip(grad, |y, dy| dy * y * (T::one() - y) )
  }

  /// Chain `grad` through a tanh given its output `self`.

  pub fn tanh_backward(&self, grad: &Self) -> Self {
    self.zip(grad, |y, dy| dy * (T::one() - y * y) )
  }

  pub fn sqr(&self) -> Self {
    self.vectorize(|a| a * a )
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sigmoid() {
    let y = Tensor::vec(&[0.0f64, 100.0, -100.0]).sigmoid();
    assert_eq!(y.raw()[0], 0.5);
    assert!((y.raw()[1] - 1.0).abs() < 1e-12);
    assert!(y.raw()[2] < 1e-12);
  }

  #[test]
  fn derivatives() {
    let x = Tensor::vec(&[-0.7f64, 0.0, 0.3, 1.9]);
    let ones = Tensor::ones(&[4]);
    let eps = 1e-6;
    let shifted = |f: fn(&Tensor<f64>) -> Tensor<f64>| {
      f(&x.add(&Tensor::fill(&[4], eps)))
        .sub(&f(&x.sub(&Tensor::fill(&[4], eps))))
        .scale(0.5 / eps)
    };
    let analytic = x.sigmoid().sigmoid_backward(&ones);
    let numeric = shifted(Tensor::sigmoid);
    for (a, n) in analytic.raw().iter().zip(numeric.raw()) {
      assert!((a - n).abs() < 1e-8);
    }
    let analytic = x.tanh().tanh_backward(&ones);
    let numeric = shifted(Tensor::tanh);
    for (a, n) in analytic.raw().iter().zip(numeric.raw()) {
      assert!((a - n).abs() < 1e-8);
    }
  }
}
