use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::debug;

use crate::{
  config::Config,
  exec::{Executor, Outcome, ShellExecutor, SshAuth, Target},
  nodes::{GroupName, TargetGroups},
};

/// Columns printed for every node
const COLUMNS: &[(&str, &str)] = &[
  ("NAME", ".metadata.name"),
  ("CAP_CPU", ".status.capacity.cpu"),
  ("CAP_MEM", ".status.capacity.memory"),
  ("HUGE_1Gi", ".status.capacity.hugepages-1Gi"),
  ("ARCH", ".status.nodeInfo.architecture"),
  ("ContRunTime", ".status.nodeInfo.containerRuntimeVersion"),
  ("kernelVers", ".status.nodeInfo.kernelVersion"),
  ("kubeletVers", ".status.nodeInfo.kubeletVersion"),
  ("OSImage", ".status.nodeInfo.osImage"),
];

/// Input arguments for `node-info` command
#[derive(Args, Debug, Default)]
pub struct NodeInfoInput {
  /// Configuration file; defaults to ./platcheck.yaml, then the embedded default
  #[arg(long, env = "PLATCHECK_CONFIG")]
  pub config: Option<PathBuf>,
}

impl NodeInfoInput {
  pub async fn node_info(&self) -> Result<()> {
    let config = Config::load(self.config.as_deref())?;
    let executor = ShellExecutor::new(SshAuth::from_config(&config.ssh));

    println!("{}", node_info(&executor, &config)?);
    Ok(())
  }
}

/// Capacity and versions of every node, followed by the SR-IOV resources of the CMG nodes
fn node_info<E: Executor>(executor: &E, config: &Config) -> Result<String> {
  let columns = COLUMNS
    .iter()
    .map(|(name, path)| format!("{name}:{path}"))
    .collect::<Vec<_>>()
    .join(",");
  let command = format!("{} get nodes -o custom-columns={columns}", config.kubectl);

  let mut info = match executor.execute(&Target::Local, &command, true) {
    Outcome::Success(table) => table,
    Outcome::Empty => bail!("No nodes returned by {}", config.kubectl),
    Outcome::Error(reason) => bail!("Unable to list nodes: {reason}"),
  };

  let groups = TargetGroups::discover(executor, config)?;
  let sriov = groups.names(GroupName::CmgSriov);
  if sriov.is_empty() {
    return Ok(info);
  }

  info.push_str("\n\nSR-IOV allocatable resources:\n");
  for node in sriov {
    let command = format!(
      "{} describe node {node} | sed -n '/Allocatable/,/System Info:/ p' | grep sriov",
      config.kubectl
    );
    let resources = match executor.execute(&Target::Local, &command, true) {
      Outcome::Success(resources) => resources,
      outcome => {
        debug!("No SR-IOV resources on {node}: {outcome:?}");
        "None".to_string()
      }
    };
    info.push_str(&format!("-> {node}:\n{resources}\n"));
  }

  Ok(info)
}
