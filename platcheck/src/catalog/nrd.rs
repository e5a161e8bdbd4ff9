use anyhow::Result;

use super::{names, Catalog, Check, Probe, Targets};
use crate::{config::Config, nodes::GroupName, platform::Environment};

pub(super) fn register(catalog: &mut Catalog, config: &Config, _env: &Environment) -> Result<()> {
  catalog.register(Check::new(
    "check_nrd_labels",
    "Nodes carry the NRD label",
    Targets::Group(GroupName::Nrd),
    Probe::GroupPopulated {
      group: GroupName::Nrd,
      labels: config.labels.nrd.join(", "),
    },
  ))?;

  catalog.register(Check::new(
    "check_nrd_worker_nodes_sysctl",
    "NRD worker nodes have the configured sysctl values",
    Targets::Group(GroupName::Nrd),
    Probe::Sysctl {
      expected: config.nrd.sysctl.clone(),
      setting: "nrd.sysctl".to_string(),
    },
  ))?;

  let mut checks = names(&["check_nrd_labels"]);
  if config.nrd.check_performance {
    checks.push("check_nrd_worker_nodes_sysctl".to_string());
  }

  catalog.add_category("nrd", checks)
}
