use std::{collections::BTreeMap, fmt};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
  config::Config,
  exec::{Executor, Outcome, Target},
  platform::{Environment, OsFamily, Platform},
};

/// Named set of nodes a check is applied to
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupName {
  Workers,
  Nrd,
  Amf,
  Cmg,
  CmgSriov,
  CmgIpvlan,
}

impl GroupName {
  pub const ALL: [GroupName; 6] = [
    Self::Workers,
    Self::Nrd,
    Self::Amf,
    Self::Cmg,
    Self::CmgSriov,
    Self::CmgIpvlan,
  ];

  pub fn description(&self) -> &'static str {
    match self {
      Self::Workers => "Worker nodes",
      Self::Nrd => "NRD worker nodes",
      Self::Amf => "AMF worker nodes",
      Self::Cmg => "CMG worker nodes",
      Self::CmgSriov => "CMG worker nodes SRIOV",
      Self::CmgIpvlan => "CMG worker nodes IPVLAN",
    }
  }
}

impl fmt::Display for GroupName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Workers => write!(f, "workers"),
      Self::Nrd => write!(f, "nrd"),
      Self::Amf => write!(f, "amf"),
      Self::Cmg => write!(f, "cmg"),
      Self::CmgSriov => write!(f, "cmg-sriov"),
      Self::CmgIpvlan => write!(f, "cmg-ipvlan"),
    }
  }
}

/// Cluster node as reported by `kubectl get nodes`
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Node {
  pub name: String,
  /// `InternalIP` address
  pub address: Option<String>,
  pub os_image: String,
}

impl Node {
  fn named(name: &str) -> Self {
    Self {
      name: name.to_string(),
      ..Self::default()
    }
  }
}

#[derive(Debug, Deserialize)]
struct NodeList {
  #[serde(default)]
  items: Vec<NodeItem>,
}

#[derive(Debug, Deserialize)]
struct NodeItem {
  metadata: NodeMetadata,
  #[serde(default)]
  status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeMetadata {
  name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeStatus {
  #[serde(default)]
  addresses: Vec<NodeAddress>,
  #[serde(default)]
  node_info: NodeInfo,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
  #[serde(rename = "type")]
  kind: String,
  address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
  #[serde(default)]
  os_image: String,
}

/// Parse the output of `kubectl get nodes -o json`
pub fn parse_nodes(json: &str) -> Result<Vec<Node>> {
  let list: NodeList = serde_json::from_str(json).context("Unable to parse node list")?;

  Ok(
    list
      .items
      .into_iter()
      .map(|item| Node {
        address: item
          .status
          .addresses
          .into_iter()
          .find(|a| a.kind == "InternalIP")
          .map(|a| a.address),
        name: item.metadata.name,
        os_image: item.status.node_info.os_image,
      })
      .collect(),
  )
}

/// Nodes of every group, resolved once per run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetGroups {
  groups: BTreeMap<GroupName, Vec<Node>>,
  /// Reach nodes by `InternalIP` instead of name
  by_address: bool,
  skipped: Vec<String>,
  only: Option<String>,
}

impl TargetGroups {
  /// Query the cluster for the nodes carrying each group's labels
  pub fn discover<E: Executor>(executor: &E, config: &Config) -> Result<Self> {
    let labels = &config.labels;
    let lookup = |labels: &[String]| nodes_with_labels(executor, &config.kubectl, labels);

    let workers = lookup(&labels.worker)?;
    let nrd = lookup(&labels.nrd)?;
    let amf = lookup(&labels.amf)?;
    let cmg = lookup(&labels.cmg)?;
    let sriov = match labels.cmg_sriov.is_empty() {
      true => cmg.clone(),
      false => lookup(&labels.cmg_sriov)?,
    };
    let ipvlan = match labels.cmg_ipvlan.is_empty() {
      true => sriov.clone(),
      false => lookup(&labels.cmg_ipvlan)?,
    };

    let groups = Self::from_groups(
      [
        (GroupName::Workers, workers),
        (GroupName::Nrd, nrd),
        (GroupName::Amf, amf),
        (GroupName::Cmg, cmg),
        (GroupName::CmgSriov, sriov),
        (GroupName::CmgIpvlan, ipvlan),
      ],
      config.platform,
    );

    for group in GroupName::ALL {
      info!("{}: {}", group.description(), groups.hosts(group).join(", "));
    }
    if groups.hosts(GroupName::Amf).is_empty() {
      warn!("No AMF worker nodes found; check the amf labels in the configuration");
    }

    Ok(groups)
  }

  /// Build groups from node lists; CMG becomes the union of the CMG groups
  pub fn from_groups<I>(groups: I, platform: Platform) -> Self
  where
    I: IntoIterator<Item = (GroupName, Vec<Node>)>,
  {
    let mut groups = groups
      .into_iter()
      .map(|(name, nodes)| (name, normalize(nodes)))
      .collect::<BTreeMap<_, _>>();
    for group in GroupName::ALL {
      groups.entry(group).or_default();
    }

    let cmg = [GroupName::Cmg, GroupName::CmgSriov, GroupName::CmgIpvlan]
      .iter()
      .flat_map(|g| groups.get(g).cloned().unwrap_or_default())
      .collect::<Vec<_>>();
    groups.insert(GroupName::Cmg, normalize(cmg));

    Self {
      groups,
      by_address: platform.ssh_by_address(),
      skipped: Vec::new(),
      only: None,
    }
  }

  /// Remove the nodes from every group
  pub fn skip(mut self, nodes: &[String]) -> Self {
    for members in self.groups.values_mut() {
      members.retain(|n| !nodes.contains(&n.name));
    }
    self.skipped.extend(nodes.iter().cloned());
    self
  }

  /// Narrow the run to a single node
  ///
  /// Workers, AMF and CMG become that node; the other groups keep it only when it is a member
  pub fn only(mut self, node: &str) -> Self {
    let known = self
      .groups
      .values()
      .flatten()
      .find(|n| n.name == node)
      .cloned()
      .unwrap_or_else(|| Node::named(node));

    for (group, members) in self.groups.iter_mut() {
      match group {
        GroupName::Workers | GroupName::Amf | GroupName::Cmg => *members = vec![known.clone()],
        _ => members.retain(|n| n.name == node),
      }
    }
    self.only = Some(node.to_string());
    self
  }

  /// Host identifiers of the group, in sorted order
  pub fn hosts(&self, group: GroupName) -> Vec<String> {
    self
      .groups
      .get(&group)
      .map(|nodes| nodes.iter().map(|n| self.identifier(n)).collect())
      .unwrap_or_default()
  }

  /// Node names of the group, regardless of how the nodes are reached
  pub fn names(&self, group: GroupName) -> Vec<String> {
    self
      .groups
      .get(&group)
      .map(|nodes| nodes.iter().map(|n| n.name.clone()).collect())
      .unwrap_or_default()
  }

  pub fn targets(&self, group: GroupName) -> Vec<Target> {
    self.hosts(group).into_iter().map(Target::Host).collect()
  }

  pub fn skipped(&self) -> &[String] {
    &self.skipped
  }

  pub fn only_node(&self) -> Option<&str> {
    self.only.as_deref()
  }

  /// Run-wide facts; the OS family is taken from the first AMF node
  pub fn environment(&self, platform: Platform) -> Environment {
    let os = self
      .groups
      .get(&GroupName::Amf)
      .and_then(|nodes| nodes.first())
      .map(|n| OsFamily::from_os_image(&n.os_image))
      .unwrap_or_default();

    Environment { platform, os }
  }

  fn identifier(&self, node: &Node) -> String {
    match (&node.address, self.by_address) {
      (Some(address), true) => address.clone(),
      _ => node.name.clone(),
    }
  }
}

fn normalize(mut nodes: Vec<Node>) -> Vec<Node> {
  nodes.sort();
  nodes.dedup_by(|a, b| a.name == b.name);
  nodes
}

/// Union of the nodes carrying any of the labels
///
/// Labels are kubectl selectors, so a partial key or value does not match
fn nodes_with_labels<E: Executor>(executor: &E, kubectl: &str, labels: &[String]) -> Result<Vec<Node>> {
  let mut nodes = Vec::new();

  for label in labels {
    let command = format!("{kubectl} get nodes -l {label} -o json");
    match executor.execute(&Target::Local, &command, true) {
      Outcome::Success(json) => nodes.extend(parse_nodes(&json)?),
      Outcome::Empty => {}
      Outcome::Error(reason) => bail!("Unable to list nodes with label {label}: {reason}"),
    }
  }

  Ok(nodes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::testing::ScriptedExecutor;

  const NODES: &str = r#"{
    "apiVersion": "v1",
    "items": [
      {
        "metadata": { "name": "worker1" },
        "status": {
          "addresses": [
            { "type": "InternalIP", "address": "10.0.0.11" },
            { "type": "Hostname", "address": "worker1" }
          ],
          "nodeInfo": { "osImage": "Red Hat Enterprise Linux CoreOS 48.84" }
        }
      },
      {
        "metadata": { "name": "worker0" },
        "status": {
          "addresses": [{ "type": "InternalIP", "address": "10.0.0.10" }],
          "nodeInfo": { "osImage": "Red Hat Enterprise Linux CoreOS 48.84" }
        }
      }
    ],
    "kind": "List"
  }"#;

  fn node(name: &str) -> Node {
    Node::named(name)
  }

  #[test]
  fn it_parses_nodes() {
    let nodes = parse_nodes(NODES).unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].name, "worker1");
    assert_eq!(nodes[0].address.as_deref(), Some("10.0.0.11"));
    assert!(nodes[1].os_image.starts_with("Red Hat"));
  }

  #[test]
  fn it_sorts_and_merges_cmg_groups() {
    let groups = TargetGroups::from_groups(
      [
        (GroupName::Cmg, vec![node("w2"), node("w1"), node("w2")]),
        (GroupName::CmgSriov, vec![node("w3")]),
        (GroupName::CmgIpvlan, vec![node("w1")]),
      ],
      Platform::K8s,
    );

    assert_eq!(groups.hosts(GroupName::Cmg), vec!["w1", "w2", "w3"]);
    assert_eq!(groups.hosts(GroupName::CmgSriov), vec!["w3"]);
    assert!(groups.hosts(GroupName::Nrd).is_empty());
  }

  #[test]
  fn it_skips_nodes_in_every_group() {
    let groups = TargetGroups::from_groups(
      [
        (GroupName::Workers, vec![node("w1"), node("w2")]),
        (GroupName::Amf, vec![node("w2")]),
      ],
      Platform::K8s,
    )
    .skip(&["w2".to_string()]);

    assert_eq!(groups.hosts(GroupName::Workers), vec!["w1"]);
    assert!(groups.hosts(GroupName::Amf).is_empty());
    assert_eq!(groups.skipped(), ["w2".to_string()]);
  }

  #[test]
  fn it_narrows_to_one_node() {
    let groups = TargetGroups::from_groups(
      [
        (GroupName::Workers, vec![node("w1"), node("w2")]),
        (GroupName::Nrd, vec![node("w1")]),
        (GroupName::Amf, vec![node("w1")]),
        (GroupName::CmgSriov, vec![node("w1"), node("w2")]),
      ],
      Platform::K8s,
    )
    .only("w2");

    assert_eq!(groups.hosts(GroupName::Workers), vec!["w2"]);
    assert_eq!(groups.hosts(GroupName::Amf), vec!["w2"]);
    assert_eq!(groups.hosts(GroupName::Cmg), vec!["w2"]);
    assert_eq!(groups.hosts(GroupName::CmgSriov), vec!["w2"]);
    assert!(groups.hosts(GroupName::Nrd).is_empty());
    assert_eq!(groups.only_node(), Some("w2"));
  }

  #[test]
  fn it_uses_addresses_on_eccd() {
    let executor = ScriptedExecutor::new().on(Some("local"), "-l region=amf", Outcome::Success(NODES.to_string()));
    let config = Config {
      platform: Platform::Eccd,
      labels: crate::config::LabelConfig {
        amf: vec!["region=amf".to_string()],
        ..Default::default()
      },
      ..Config::default()
    };

    let groups = TargetGroups::discover(&executor, &config).unwrap();

    assert_eq!(groups.hosts(GroupName::Amf), vec!["10.0.0.10", "10.0.0.11"]);
    assert_eq!(groups.names(GroupName::Amf), vec!["worker0", "worker1"]);
    assert_eq!(groups.environment(Platform::Eccd).os, OsFamily::RhelLike);
  }

  #[test]
  fn it_falls_back_to_cmg_labels() {
    let executor = ScriptedExecutor::new().on(Some("local"), "-l region=cmg", Outcome::Success(NODES.to_string()));
    let config = Config {
      labels: crate::config::LabelConfig {
        cmg: vec!["region=cmg".to_string()],
        ..Default::default()
      },
      ..Config::default()
    };

    let groups = TargetGroups::discover(&executor, &config).unwrap();

    assert_eq!(groups.hosts(GroupName::CmgSriov), vec!["worker0", "worker1"]);
    assert_eq!(groups.hosts(GroupName::CmgIpvlan), vec!["worker0", "worker1"]);
    assert_eq!(groups.environment(Platform::K8s).os, OsFamily::Other);
  }

  #[test]
  fn it_fails_when_kubectl_fails() {
    let executor = ScriptedExecutor::new().on(None, "get nodes", Outcome::Error("connection refused".to_string()));
    let err = TargetGroups::discover(&executor, &Config::default()).unwrap_err();
    assert!(err.to_string().contains("connection refused"));
  }
}
