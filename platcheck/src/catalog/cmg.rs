use anyhow::Result;

use super::{cpu_pinning, names, socket_buffer, Bound, Catalog, Check, CommandProbe, InterfaceProbe, InterfaceStep, Probe, Targets};
use crate::{
  config::Config,
  nodes::GroupName,
  platform::{Environment, Platform, Variants},
  predicate::Predicate,
};

const CMG: Targets = Targets::Group(GroupName::Cmg);

pub(super) fn register(catalog: &mut Catalog, config: &Config, env: &Environment) -> Result<()> {
  let cmg = &config.cmg;

  catalog.register(Check::new(
    "check_cmg_cpu_pinning",
    "kubelet CPU manager policy is static on CMG nodes",
    CMG,
    cpu_pinning(env),
  ))?;

  let numa = Variants::new((
    r#"sudo cat /var/lib/kubelet/config.yaml | grep 'topologyManagerPolicy: "single-numa-node"'"#,
    "has topologyManagerPolicy: single-numa-node",
    "does not have topologyManagerPolicy: single-numa-node",
  ))
  .on(
    Platform::Ncs,
    (
      r#"sudo cat /etc/kubernetes/kubelet-config.yml | grep 'topologyManagerPolicy: "single-numa-node"'"#,
      r#"has topologyManagerPolicy: "single-numa-node""#,
      r#"does not have topologyManagerPolicy: "single-numa-node""#,
    ),
  )
  .on(
    Platform::Os,
    (
      "sudo cat /etc/kubernetes/kubelet.conf | grep topologyManagerPolicy | grep single-numa-node",
      "has topologyManagerPolicy: single-numa-node",
      "does not have topologyManagerPolicy: single-numa-node",
    ),
  );
  let (command, success, failure) = *numa.resolve(env);
  catalog.register(Check::new(
    "check_cmg_numa_pinning",
    "kubelet topology manager pins to a single NUMA node on CMG nodes",
    CMG,
    Probe::Command(CommandProbe::new(command, Predicate::NonEmpty, success, failure)),
  ))?;

  catalog.register(Check::new(
    "check_cmg_hugepages",
    "HugePages are enabled on CMG nodes",
    CMG,
    Probe::Command(
      CommandProbe::new(
        "sudo cat /proc/meminfo | grep HugePages_Total | awk '{printf $2}'",
        Predicate::AboveMin(1),
        "has HugePages enabled",
        "does not have HugePages enabled (HugePage_Total: 0)",
      )
      .show_value(" -> HugePages_Total: "),
    ),
  ))?;

  catalog.register(Check::new(
    "check_cmg_worker_nodes_sysctl",
    "CMG worker nodes have the configured sysctl values",
    CMG,
    Probe::Sysctl {
      expected: cmg.sysctl.clone(),
      setting: "cmg.sysctl".to_string(),
    },
  ))?;

  let mut sriov_steps = vec![
    InterfaceStep::Up,
    InterfaceStep::MtuAbove(cmg.sriov_mtu_min),
    InterfaceStep::VirtualFunctions,
  ];
  if cmg.sriov_trust_on {
    sriov_steps.push(InterfaceStep::TrustOn);
  }
  catalog.register(Check::new(
    "check_cmg_worker_nodes_sriov_interfaces",
    "SR-IOV interfaces are up with jumbo MTU and virtual functions on CMG nodes",
    Targets::Group(GroupName::CmgSriov),
    Probe::Interfaces(InterfaceProbe {
      interfaces: cmg.sriov_interfaces.clone(),
      steps: sriov_steps,
      setting: "cmg.sriov_interfaces".to_string(),
    }),
  ))?;

  catalog.register(Check::new(
    "check_cmg_worker_nodes_ipvlan_interfaces",
    "ipvlan host interfaces are up on CMG nodes",
    Targets::Group(GroupName::CmgIpvlan),
    Probe::Interfaces(InterfaceProbe {
      interfaces: cmg.ipvlan_interfaces.clone(),
      steps: vec![InterfaceStep::Up],
      setting: "cmg.ipvlan_interfaces".to_string(),
    }),
  ))?;

  catalog.register(Check::new(
    "check_cmg_worker_nodes_k8s_cluster_csf_mtu_size",
    "Kubernetes cluster network interface MTU on CMG nodes",
    CMG,
    Probe::Interfaces(InterfaceProbe {
      interfaces: cmg.k8s_interface.iter().cloned().collect(),
      steps: vec![InterfaceStep::MtuAtLeast(cmg.csf_mtu_size)],
      setting: "cmg.k8s_interface".to_string(),
    }),
  ))?;

  let mut checks = names(&[
    "check_cmg_cpu_pinning",
    "check_cmg_worker_nodes_sysctl",
    "check_cmg_numa_pinning",
  ]);

  if cmg.deploy_with_dpdk {
    checks.push("check_cmg_hugepages".to_string());
  }
  if !cmg.sriov_interfaces.is_empty() {
    checks.push("check_cmg_worker_nodes_sriov_interfaces".to_string());
  }
  if !cmg.ipvlan_interfaces.is_empty() {
    checks.push("check_cmg_worker_nodes_ipvlan_interfaces".to_string());
  }
  if cmg.k8s_interface.is_some() {
    checks.push("check_cmg_worker_nodes_k8s_cluster_csf_mtu_size".to_string());
  }

  let buffers = [
    ("net.core.rmem_max", cmg.rmem_max.map(Bound::Max)),
    ("net.core.wmem_max", cmg.wmem_max.map(Bound::Max)),
    ("net.ipv4.udp_rmem_min", cmg.udp_rmem_min.map(Bound::Min)),
    ("net.ipv4.udp_wmem_min", cmg.udp_wmem_min.map(Bound::Min)),
  ];
  for (key, bound) in buffers {
    if let Some(bound) = bound {
      let check = socket_buffer("cmg", GroupName::Cmg, key, bound);
      checks.push(check.name.clone());
      catalog.register(check)?;
    }
  }

  catalog.add_category("cmg", checks)
}
