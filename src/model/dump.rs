use std::collections::BTreeMap;

use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  model::{ Module, node::{ Node, Attr } },
  scalar::Float,
  tensor::Tensor,
};


/// Serialized state of one [Node].

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct NodeDump<T: Float> {
  name: String,
  dims: BTreeMap<String, Option<usize>>,
  params: BTreeMap<String, Option<Tensor<T>>>,
  attrs: BTreeMap<String, Attr>,
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct ModelDump<T: Float> {
  nodes: Vec<NodeDump<T>>,
}


pub(crate) fn to_bytes<T: Float>(nodes: Vec<&Node<T>>) -> Result<Vec<u8>> {
  let nodes: Vec<NodeDump<T>> = nodes.into_iter().map(|node| NodeDump {
    name: node.name().to_string(),
    dims: node.dims.clone(),
    params: node.params.iter()
      .map(|(name, param)| (name.clone(), param.value.clone()) )
      .collect(),
    attrs: node.attrs.clone(),
  }).collect();
  log::debug!("serializing {} nodes", nodes.len());
  Ok(postcard::to_allocvec(&ModelDump { nodes })?)
}

pub(crate) fn from_bytes<T: Float>(bytes: &[u8]) -> Result<Vec<NodeDump<T>>> {
  let dump: ModelDump<T> = postcard::from_bytes(bytes)?;
  log::debug!("deserialized {} nodes", dump.nodes.len());
  Ok(dump.nodes)
}

/// Check that `dumps` describe the nodes of `nodes`, in order,
/// before anything gets overwritten.

pub(crate) fn check<T: Float>(nodes: &[&Node<T>], dumps: &[NodeDump<T>]) -> Result<()> {
  if nodes.len() != dumps.len() {
    return Err(Error::Mismatch(format!("expected {} nodes, found {}", nodes.len(), dumps.len())))
  }
  for (node, dump) in nodes.iter().zip(dumps) {
    if dump.name != node.name() {
      return Err(Error::Mismatch(format!("expected node '{}', found '{}'", node.name(), dump.name)))
    }
    let same_keys = dump.dims.keys().eq(node.dims.keys()) &&
      dump.params.keys().eq(node.params.keys()) &&
      dump.attrs.keys().eq(node.attrs.keys());
    if !same_keys {
      return Err(Error::Mismatch(format!("node '{}' declares different dims, params or attrs", dump.name)))
    }
  }
  Ok(())
}

pub(crate) fn restore<T: Float>(node: &mut Node<T>, dump: Option<NodeDump<T>>) -> Result<()> {
  let dump = dump.ok_or_else(|| Error::Mismatch(format!("no data left for node '{}'", node.name())) )?;
  node.dims = dump.dims;
  node.attrs = dump.attrs;
  for (name, value) in dump.params {
    let param = node.params.get_mut(&name).ok_or_else(|| Error::Mismatch(name.clone()) )?;
    param.grad = value.as_ref().map(|value| Tensor::zeros(value.dims()) );
    param.value = value;
  }
  Ok(())
}

/// Restore `module` and its descendants from consecutive dumps.

pub(crate) fn load<T: Float>(module: &mut dyn Module<T>, dumps: &mut dyn Iterator<Item = NodeDump<T>>) -> Result<()> {
  restore(module.node_mut(), dumps.next())?;
  for layer in module.layers_mut() {
    load(layer, dumps)?;
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::ops::CpuOps;

  fn node(name: &str) -> Node<f32> {
    Node::new(name, CpuOps::shared())
      .with_dim("nO", Some(2))
      .with_param("W")
      .with_attr("depth", 1usize)
  }

  #[test]
  fn round_trip() {
    let mut source = node("dense");
    source.set_param("W", Tensor::vec(&[1.0, 2.0])).unwrap();
    source.inc_grad("W", &Tensor::vec(&[5.0, 5.0])).unwrap();
    source.set_attr("depth", 3usize).unwrap();
    let bytes = to_bytes(vec![&source]).unwrap();

    let mut target = node("dense");
    let dumps = from_bytes::<f32>(&bytes).unwrap();
    check(&[&target], &dumps).unwrap();
    restore(&mut target, dumps.into_iter().next()).unwrap();
    assert_eq!(target.get_param("W").unwrap(), &Tensor::vec(&[1.0, 2.0]));
    assert_eq!(target.get_grad("W").unwrap(), &Tensor::zeros(&[2]));
    assert_eq!(target.get_int("depth").unwrap(), 3);
    assert_ne!(target.id(), source.id());
  }

  #[test]
  fn structure_must_match() {
    let source = node("dense");
    let dumps = from_bytes::<f32>(&to_bytes(vec![&source]).unwrap()).unwrap();
    assert!(matches!(check(&[&node("other")], &dumps), Err(Error::Mismatch(_))));
    assert!(matches!(check(&[&node("dense"), &node("dense")], &dumps), Err(Error::Mismatch(_))));
    let extended = node("dense").with_param("b");
    assert!(matches!(check(&[&extended], &dumps), Err(Error::Mismatch(_))));
  }

  #[test]
  fn garbage() {
    assert!(matches!(from_bytes::<f32>(&[255, 255, 255]), Err(Error::Serialize(_))));
  }
}
