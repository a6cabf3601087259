use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{ Serialize, Deserialize };

use crate::{
  internal::*,
  error::{ Error, Result },
  ops::Ops,
  optimize::{ ParamKey, UpdateRule },
  scalar::Float,
  tensor::Tensor,
};


/// Non-differentiable configuration value stored on a [Node].

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl From<bool> for Attr {
  fn from(value: bool) -> Self { Attr::Bool(value) }
}

impl From<i64> for Attr {
  fn from(value: i64) -> Self { Attr::Int(value) }
}

impl From<usize> for Attr {
  fn from(value: usize) -> Self { Attr::Int(value as i64) }
}

impl From<f64> for Attr {
  fn from(value: f64) -> Self { Attr::Float(value) }
}

impl From<&str> for Attr {
  fn from(value: &str) -> Self { Attr::Str(value.to_string()) }
}


#[derive(Debug, Clone)]
pub(crate) struct Param<T: Float> {
  pub(crate) value: Option<Tensor<T>>,
  pub(crate) grad: Option<Tensor<T>>,
}


/// Data every layer carries: dimensions, parameters with their
/// gradients, attributes and the shared numeric backend.
///
/// All keyed accessors fail on names that were never declared.
/// Dims and params are declared by the layer constructor; values may stay
/// `None` until the layer is initialized.

pub struct Node<T: Float> {
  id: usize,
  name: String,
  pub(crate) dims: BTreeMap<String, Option<usize>>,
  pub(crate) params: BTreeMap<String, Param<T>>,
  pub(crate) attrs: BTreeMap<String, Attr>,
  ops: Rc<dyn Ops<T>>,
}

impl<T: Float> std::fmt::Debug for Node<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_struct("Node")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("dims", &self.dims)
      .field("params", &self.params.keys().collect::<Vec<_>>())
      .field("attrs", &self.attrs)
      .field("ops", &self.ops.name())
      .finish()
  }
}

impl<T: Float> Node<T> {
  pub fn new(name: impl Into<String>, ops: Rc<dyn Ops<T>>) -> Self {
    Self {
      id: make_id(),
      name: name.into(),
      dims: BTreeMap::new(),
      params: BTreeMap::new(),
      attrs: BTreeMap::new(),
      ops,
    }
  }

  pub fn with_dim(mut self, name: &str, value: Option<usize>) -> Self {
    self.dims.insert(name.to_string(), value);
    self
  }

  pub fn with_param(mut self, name: &str) -> Self {
    self.params.insert(name.to_string(), Param { value: None, grad: None });
    self
  }

  pub fn with_attr(mut self, name: &str, value: impl Into<Attr>) -> Self {
    self.attrs.insert(name.to_string(), value.into());
    self
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn ops(&self) -> &Rc<dyn Ops<T>> {
    &self.ops
  }

  fn unknown(&self, kind: &'static str, name: &str) -> Error {
    Error::Unknown { node: self.name.clone(), kind, name: name.to_string() }
  }

  // Dimensions

  /// Whether `name` is declared and resolved.

  pub fn has_dim(&self, name: &str) -> bool {
    matches!(self.dims.get(name), Some(Some(_)))
  }

  /// The dimension's value, `None` while unresolved.

  pub fn maybe_dim(&self, name: &str) -> Result<Option<usize>> {
    self.dims.get(name).copied().ok_or_else(|| self.unknown("dim", name) )
  }

  pub fn get_dim(&self, name: &str) -> Result<usize> {
    self.maybe_dim(name)?.ok_or_else(|| Error::UnresolvedDim {
      node: self.name.clone(),
      dim: name.to_string(),
    })
  }

  /// Resolve a declared dimension.
  ///
  /// Changing a dimension that is already resolved fails once
  /// parameters have been allocated from it.

  pub fn set_dim(&mut self, name: &str, value: usize) -> Result<()> {
    self.check_dim(name, value)?;
    self.dims.insert(name.to_string(), Some(value));
    Ok(())
  }

  /// Fails where [set_dim](Node::set_dim) would, without changing anything.

  pub fn check_dim(&self, name: &str, value: usize) -> Result<()> {
    let allocated = self.params.values().any(|p| p.value.is_some() );
    match self.maybe_dim(name)? {
      Some(current) if current != value && allocated => {
        Err(Error::shape(format!("dim '{name}' of '{}' with allocated params", self.name), &[current], &[value]))
      },
      _ => Ok(()),
    }
  }

  // Parameters

  /// Whether `name` is declared and allocated.

  pub fn has_param(&self, name: &str) -> bool {
    matches!(self.params.get(name), Some(Param { value: Some(_), .. }))
  }

  pub fn get_param(&self, name: &str) -> Result<&Tensor<T>> {
    let param = self.params.get(name).ok_or_else(|| self.unknown("param", name) )?;
    param.value.as_ref().ok_or_else(|| Error::Unallocated {
      node: self.name.clone(),
      name: name.to_string(),
    })
  }

  /// Store a parameter value and reset its gradient to zero.
  /// Replacing an allocated parameter must keep its shape.

  pub fn set_param(&mut self, name: &str, value: Tensor<T>) -> Result<()> {
    let node = self.name.clone();
    let param = self.params.get_mut(name).ok_or_else(|| Error::Unknown {
      node: node.clone(),
      kind: "param",
      name: name.to_string(),
    })?;
    match &param.value {
      Some(current) if current.dims() != value.dims() => {
        return Err(Error::shape(format!("param '{name}' of '{node}'"), current.dims(), value.dims()))
      },
      _ => {},
    }
    param.grad = Some(Tensor::zeros(value.dims()));
    param.value = Some(value);
    Ok(())
  }

  /// Allocate a parameter, discarding any previous storage.

  pub(crate) fn alloc_param(&mut self, name: &str, value: Tensor<T>) -> Result<()> {
    let param = self.params.get_mut(name).ok_or_else(|| Error::Unknown {
      node: self.name.clone(),
      kind: "param",
      name: name.to_string(),
    })?;
    param.grad = Some(Tensor::zeros(value.dims()));
    param.value = Some(value);
    Ok(())
  }

  pub fn get_grad(&self, name: &str) -> Result<&Tensor<T>> {
    let param = self.params.get(name).ok_or_else(|| self.unknown("grad", name) )?;
    param.grad.as_ref().ok_or_else(|| Error::Unallocated {
      node: self.name.clone(),
      name: name.to_string(),
    })
  }

  /// Accumulate into a parameter's gradient.

  pub fn inc_grad(&mut self, name: &str, delta: &Tensor<T>) -> Result<()> {
    let node = self.name.clone();
    let param = self.params.get_mut(name).ok_or_else(|| Error::Unknown {
      node: node.clone(),
      kind: "grad",
      name: name.to_string(),
    })?;
    let grad = param.grad.as_mut().ok_or_else(|| Error::Unallocated {
      node: node.clone(),
      name: name.to_string(),
    })?;
    if grad.dims() != delta.dims() {
      return Err(Error::shape(format!("gradient of '{name}' in '{node}'"), grad.dims(), delta.dims()))
    }
    *grad += delta;
    Ok(())
  }

  /// Replace every allocated parameter by the rule's update and
  /// store the gradient it hands back.
  ///
  /// Either all parameters are updated or, if the rule returns a
  /// misshapen tensor for any of them, none are.

  pub fn finish_update(&mut self, rule: &mut dyn UpdateRule<T>) -> Result<()> {
    let mut updates = Vec::with_capacity(self.params.len());
    for (name, param) in &self.params {
      let (Some(value), Some(grad)) = (&param.value, &param.grad) else { continue };
      let key = ParamKey { node: self.id, name: name.clone() };
      let (new_value, new_grad) = rule.update(&key, value, grad);
      for (kind, tensor) in [("update", &new_value), ("reset gradient", &new_grad)] {
        if tensor.dims() != value.dims() {
          return Err(Error::shape(format!("{kind} of '{name}' in '{}'", self.name), value.dims(), tensor.dims()))
        }
      }
      updates.push((name.clone(), new_value, new_grad));
    }
    for (name, value, grad) in updates {
      if let Some(param) = self.params.get_mut(&name) {
        param.value = Some(value);
        param.grad = Some(grad);
      }
    }
    Ok(())
  }

  // Attributes

  pub fn get_attr(&self, name: &str) -> Result<&Attr> {
    self.attrs.get(name).ok_or_else(|| self.unknown("attr", name) )
  }

  /// Overwrite a declared attribute.

  pub fn set_attr(&mut self, name: &str, value: impl Into<Attr>) -> Result<()> {
    let attr = self.attrs.get_mut(name).ok_or_else(|| Error::Unknown {
      node: self.name.clone(),
      kind: "attr",
      name: name.to_string(),
    })?;
    *attr = value.into();
    Ok(())
  }

  pub fn get_bool(&self, name: &str) -> Result<bool> {
    match self.get_attr(name)? {
      Attr::Bool(value) => Ok(*value),
      _ => Err(self.attr_type(name, "bool")),
    }
  }

  pub fn get_int(&self, name: &str) -> Result<i64> {
    match self.get_attr(name)? {
      Attr::Int(value) => Ok(*value),
      _ => Err(self.attr_type(name, "int")),
    }
  }

  pub fn get_float(&self, name: &str) -> Result<f64> {
    match self.get_attr(name)? {
      Attr::Float(value) => Ok(*value),
      _ => Err(self.attr_type(name, "float")),
    }
  }

  fn attr_type(&self, name: &str, expected: &'static str) -> Error {
    Error::AttrType { node: self.name.clone(), name: name.to_string(), expected }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::ops::CpuOps;

  fn node() -> Node<f32> {
    Node::new("dense", CpuOps::shared())
      .with_dim("nO", Some(3))
      .with_dim("nI", None)
      .with_param("W")
      .with_attr("dropout", 0.1)
  }

  #[test]
  fn dims() {
    let mut node = node();
    assert_eq!(node.get_dim("nO").unwrap(), 3);
    assert!(!node.has_dim("nI"));
    assert!(matches!(node.get_dim("nI"), Err(Error::UnresolvedDim { .. })));
    assert!(matches!(node.get_dim("nX"), Err(Error::Unknown { kind: "dim", .. })));
    node.set_dim("nI", 2).unwrap();
    assert_eq!(node.get_dim("nI").unwrap(), 2);
    assert!(node.set_dim("nX", 2).is_err());
  }

  #[test]
  fn params() {
    let mut node = node();
    assert!(!node.has_param("W"));
    assert!(matches!(node.get_param("W"), Err(Error::Unallocated { .. })));
    assert!(matches!(node.get_param("b"), Err(Error::Unknown { kind: "param", .. })));
    node.set_param("W", Tensor::ones(&[3, 2])).unwrap();
    assert!(node.has_param("W"));
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::zeros(&[3, 2]));
    assert!(matches!(node.set_param("W", Tensor::ones(&[2, 2])), Err(Error::Shape { .. })));
    assert!(node.set_param("b", Tensor::ones(&[2])).is_err());
  }

  #[test]
  fn locked_dims() {
    let mut node = node();
    node.set_dim("nI", 2).unwrap();
    node.set_param("W", Tensor::ones(&[3, 2])).unwrap();
    assert!(node.set_dim("nI", 2).is_ok());
    assert!(matches!(node.set_dim("nI", 4), Err(Error::Shape { .. })));
  }

  #[test]
  fn gradients() {
    let mut node = node();
    node.set_param("W", Tensor::ones(&[3, 2])).unwrap();
    node.inc_grad("W", &Tensor::ones(&[3, 2])).unwrap();
    node.inc_grad("W", &Tensor::ones(&[3, 2])).unwrap();
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::fill(&[3, 2], 2.0));
    assert!(node.inc_grad("W", &Tensor::ones(&[2])).is_err());
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::fill(&[3, 2], 2.0));

    let mut sgd = |_: &ParamKey, w: &Tensor<f32>, g: &Tensor<f32>| {
      (w.sub(&g.scale(0.5)), Tensor::zeros(g.dims()))
    };
    node.finish_update(&mut sgd).unwrap();
    assert_eq!(node.get_param("W").unwrap(), &Tensor::zeros(&[3, 2]));
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::zeros(&[3, 2]));
  }

  #[test]
  fn update_must_keep_shape() {
    let mut node = node();
    node.set_param("W", Tensor::ones(&[3, 2])).unwrap();
    let mut bad = |_: &ParamKey, _: &Tensor<f32>, g: &Tensor<f32>| (Tensor::zeros(&[1]), g.clone());
    assert!(matches!(node.finish_update(&mut bad), Err(Error::Shape { .. })));
    assert_eq!(node.get_param("W").unwrap(), &Tensor::ones(&[3, 2]));
  }

  #[test]
  fn failed_update_changes_nothing() {
    let mut node = node().with_param("b");
    node.set_param("W", Tensor::ones(&[3, 2])).unwrap();
    node.set_param("b", Tensor::ones(&[3])).unwrap();
    node.inc_grad("W", &Tensor::ones(&[3, 2])).unwrap();

    // "W" sorts before "b", so it passes before "b" fails
    let mut bad_b = |key: &ParamKey, w: &Tensor<f32>, g: &Tensor<f32>| {
      let w = if key.name == "b" { Tensor::zeros(&[1, 3]) } else { w.scale(2.0) };
      (w, Tensor::zeros(g.dims()))
    };
    let err = node.finish_update(&mut bad_b).unwrap_err();
    assert!(matches!(err, Error::Shape { ref expected, ref found, .. } if expected == &[3] && found == &[1, 3]));
    assert_eq!(node.get_param("W").unwrap(), &Tensor::ones(&[3, 2]));
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::ones(&[3, 2]));

    let mut bad_grad = |_: &ParamKey, w: &Tensor<f32>, _: &Tensor<f32>| (w.clone(), Tensor::zeros(&[1]));
    let err = node.finish_update(&mut bad_grad).unwrap_err();
    assert!(matches!(err, Error::Shape { ref found, .. } if found == &[1]));
    assert_eq!(node.get_grad("W").unwrap(), &Tensor::ones(&[3, 2]));
  }

  #[test]
  fn attrs() {
    let mut node = node();
    assert_eq!(node.get_float("dropout").unwrap(), 0.1);
    assert!(matches!(node.get_bool("dropout"), Err(Error::AttrType { .. })));
    assert!(matches!(node.get_attr("bi"), Err(Error::Unknown { kind: "attr", .. })));
    node.set_attr("dropout", 0.2).unwrap();
    assert_eq!(node.get_attr("dropout").unwrap(), &Attr::Float(0.2));
    assert!(node.set_attr("bi", true).is_err());
  }
}
