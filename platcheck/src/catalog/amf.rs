use anyhow::Result;

use super::{cpu_pinning, names, socket_buffer, Bound, Catalog, Check, CommandProbe, InterfaceProbe, InterfaceStep, Probe, Step, Targets};
use crate::{
  config::Config,
  nodes::GroupName,
  platform::{Environment, OsFamily, Variants},
  predicate::Predicate,
};

/// sysctl keys only present on RHEL and CentOS kernels
const RHEL_ONLY_SYSCTL: &[&str] = &["kernel.sched_rt_runtime_us"];

const AMF: Targets = Targets::Group(GroupName::Amf);

pub(super) fn register(catalog: &mut Catalog, config: &Config, env: &Environment) -> Result<()> {
  let kubectl = &config.kubectl;

  catalog.register(Check::new(
    "check_amf_cpu_pinning",
    "kubelet CPU manager policy is static on AMF nodes",
    AMF,
    cpu_pinning(env),
  ))?;

  catalog.register(Check::new(
    "check_amf_whereabouts_plugin_installed",
    "whereabouts IPAM pods and CRDs are installed",
    Targets::Local,
    Probe::Steps(vec![
      Step::require(
        format!("{kubectl} get pods -A | grep -i whereabouts 2>/dev/null"),
        "whereabout pods exist",
        "whereabouts seems not installed",
      ),
      Step::require(
        format!("{kubectl} get crds -n kube-system | grep ippools.whereabouts 2>/dev/null"),
        "whereabouts crd: ippools.whereabouts.cni.cncf.io exists",
        "whereabouts crd: ippools.whereabouts.cni.cncf.io seems not installed",
      ),
      Step::require(
        format!("{kubectl} get crds -n kube-system | grep overlappingrangeipreservations.whereabouts 2>/dev/null"),
        "whereabouts crd: overlappingrangeipreservations.whereabouts.cni.cncf.io exists",
        "whereabouts crd: overlappingrangeipreservations.whereabouts.cni.cncf.io seems not installed",
      ),
    ]),
  ))?;

  let selinux = Variants::new("cat /etc/selinux/config | egrep '^SELINUX=' | cut -d'=' -f2")
    .on_os(OsFamily::Suse, "sudo sestatus -v | awk '{print $3}'");
  catalog.register(Check::new(
    "check_amf_worker_nodes_selinux_permissive",
    "SELinux is permissive or disabled on AMF nodes",
    AMF,
    Probe::Command(
      CommandProbe::new(
        *selinux.resolve(env),
        Predicate::in_set(["permissive", "disabled"]),
        "has SELINUX setting OK",
        "does not have SELINUX=permissive or disabled",
      )
      .show_value(" -> SELINUX = "),
    ),
  ))?;

  let kernel_modules = [
    ("check_amf_worker_nodes_ipv6_enabled", "sudo lsmod | grep ipv6", "ipv6"),
    (
      "check_amf_worker_nodes_sctp_enabled",
      "sudo modprobe sctp; sudo lsmod | grep sctp",
      "sctp",
    ),
    ("check_amf_worker_nodes_ipsec_kernel_module", "sudo lsmod | grep -i xfrm", "ipsec"),
  ];
  for (name, command, feature) in kernel_modules {
    catalog.register(Check::new(
      name,
      format!("{feature} is enabled in the kernel of AMF nodes"),
      AMF,
      Probe::Command(CommandProbe::new(
        command,
        Predicate::NonEmpty,
        format!("has {feature} enabled in its kernel"),
        format!("does not have {feature} enabled in its kernel"),
      )),
    ))?;
  }

  let ipsec = Variants::new("sudo systemctl show -p ActiveState --value ipsec").on_os(
    OsFamily::RhelLike,
    "systemctl --no-pager status ipsec.service | grep 'Active: active' | awk '{print $2}'",
  );
  catalog.register(Check::new(
    "check_amf_worker_nodes_ipsec_service_active",
    "ipsec service is active on AMF nodes",
    AMF,
    Probe::Command(
      CommandProbe::new(
        *ipsec.resolve(env),
        Predicate::in_set(["active"]),
        "has correct setting",
        "does not have ipsec service = active",
      )
      .show_value(" -> ipsec service = "),
    ),
  ))?;

  catalog.register(Check::new(
    "check_amf_worker_nodes_transparent_hugepage_madvise",
    "transparent hugepages are set to madvise on AMF nodes",
    AMF,
    Probe::Command(
      CommandProbe::new(
        r"cat /sys/kernel/mm/transparent_hugepage/enabled | grep -Po '\[\K[^]]*'",
        Predicate::in_set(["madvise"]),
        "has correct setting",
        "does not have transparent_hugepage = madvise",
      )
      .show_value(" -> transparent_hugepage = "),
    ),
  ))?;

  for runtime in ["docker", "containerd"] {
    catalog.register(Check::new(
      format!("check_amf_worker_nodes_{runtime}_msgqueue_unlimited"),
      format!("{runtime} service has an unlimited message queue on AMF nodes"),
      AMF,
      Probe::Command(CommandProbe::new(
        format!("sudo cat /etc/systemd/system/multi-user.target.wants/{runtime}.service | grep LimitMSGQUEUE=infinity"),
        Predicate::NonEmpty,
        "has LimitMSGQUEUE=infinity OK",
        "does not have LimitMSGQUEUE=infinity",
      )),
    ))?;
  }

  catalog.register(Check::new(
    "check_amf_worker_nodes_sysctl",
    "AMF worker nodes have the configured sysctl values",
    AMF,
    Probe::Sysctl {
      expected: sysctl_for(config, env),
      setting: "amf.sysctl".to_string(),
    },
  ))?;

  catalog.register(Check::new(
    "check_amf_worker_nodes_ipvlan_interfaces",
    "ipvlan host interfaces are up on AMF nodes",
    AMF,
    Probe::Interfaces(InterfaceProbe {
      interfaces: config.amf.ipvlan_interfaces.clone(),
      steps: vec![InterfaceStep::Up],
      setting: "amf.ipvlan_interfaces".to_string(),
    }),
  ))?;

  let mut checks = names(&[
    "check_amf_cpu_pinning",
    "check_amf_worker_nodes_ipv6_enabled",
    "check_amf_worker_nodes_containerd_msgqueue_unlimited",
    "check_amf_worker_nodes_docker_msgqueue_unlimited",
    "check_amf_whereabouts_plugin_installed",
    "check_amf_worker_nodes_sysctl",
    "check_amf_worker_nodes_transparent_hugepage_madvise",
    "check_amf_worker_nodes_sctp_enabled",
    "check_amf_worker_nodes_selinux_permissive",
  ]);

  if config.amf.check_ipsec {
    checks.extend(names(&[
      "check_amf_worker_nodes_ipsec_kernel_module",
      "check_amf_worker_nodes_ipsec_service_active",
    ]));
  }

  if !config.amf.ipvlan_interfaces.is_empty() {
    checks.push("check_amf_worker_nodes_ipvlan_interfaces".to_string());
  }

  let buffers = [
    ("net.core.rmem_max", config.amf.rmem_max),
    ("net.core.wmem_max", config.amf.wmem_max),
  ];
  for (key, bound) in buffers {
    if let Some(bound) = bound {
      let check = socket_buffer("amf", GroupName::Amf, key, Bound::Max(bound));
      checks.push(check.name.clone());
      catalog.register(check)?;
    }
  }

  catalog.add_category("amf", checks)
}

/// Expected sysctl values, without the keys the node's kernel does not provide
fn sysctl_for(config: &Config, env: &Environment) -> std::collections::BTreeMap<String, String> {
  let mut expected = config.amf.sysctl.clone();
  if env.os != OsFamily::RhelLike {
    for key in RHEL_ONLY_SYSCTL {
      expected.remove(*key);
    }
  }
  expected
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;
  use crate::platform::Platform;

  fn config() -> Config {
    let mut config = Config::default();
    config
      .amf
      .sysctl
      .insert("kernel.sched_rt_runtime_us".to_string(), "-1".to_string());
    config
      .amf
      .sysctl
      .insert("net.core.rmem_max".to_string(), "4194304".to_string());
    config
  }

  #[rstest]
  #[case(OsFamily::RhelLike, 2)]
  #[case(OsFamily::Suse, 1)]
  #[case(OsFamily::Other, 1)]
  fn sysctl_test(#[case] os: OsFamily, #[case] expected: usize) {
    let env = Environment {
      platform: Platform::K8s,
      os,
    };
    assert_eq!(sysctl_for(&config(), &env).len(), expected);
  }

  #[rstest]
  #[case(OsFamily::Suse, "sudo sestatus -v | awk '{print $3}'")]
  #[case(OsFamily::RhelLike, "cat /etc/selinux/config | egrep '^SELINUX=' | cut -d'=' -f2")]
  fn selinux_command_test(#[case] os: OsFamily, #[case] expected: &str) {
    let env = Environment {
      platform: Platform::Eccd,
      os,
    };
    let mut catalog = Catalog::default();
    register(&mut catalog, &config(), &env).unwrap();

    match &catalog.get("check_amf_worker_nodes_selinux_permissive").unwrap().probe {
      Probe::Command(probe) => {
        assert_eq!(probe.command, expected);
        assert!(probe.strip);
      }
      probe => panic!("unexpected probe {probe:?}"),
    }
  }

  #[test]
  fn it_adds_optional_checks_from_config() {
    let mut config = config();
    config.amf.check_ipsec = true;
    config.amf.rmem_max = Some(4194304);

    let mut catalog = Catalog::default();
    register(&mut catalog, &config, &Environment::default()).unwrap();

    let amf = &catalog.categories()[0].checks;
    assert!(amf.contains(&"check_amf_worker_nodes_ipsec_service_active".to_string()));
    assert!(amf.contains(&"check_amf_worker_nodes_rmem_max_socket_buffer".to_string()));
    assert!(!amf.contains(&"check_amf_worker_nodes_wmem_max_socket_buffer".to_string()));
    assert!(!amf.contains(&"check_amf_worker_nodes_ipvlan_interfaces".to_string()));
  }
}
