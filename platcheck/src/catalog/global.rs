use anyhow::Result;

use super::{names, Catalog, Check, CommandProbe, Probe, Step, Targets};
use crate::{
  config::Config,
  nodes::GroupName,
  platform::{Environment, Platform, Variants},
  predicate::Predicate,
};

pub(super) fn register(catalog: &mut Catalog, config: &Config, env: &Environment) -> Result<()> {
  let kubectl = &config.kubectl;

  catalog.register(Check::new(
    "check_istio",
    "istio namespace and ingress gateway are deployed",
    Targets::Local,
    Probe::Steps(istio_steps(config, env)),
  ))?;

  catalog.register(Check::new(
    "check_glusterfs",
    "glusterFS storage class is present",
    Targets::Local,
    Probe::Command(CommandProbe::new(
      format!("{kubectl} get storageclass -A | grep glusterfs-storageclass 2>/dev/null"),
      Predicate::NonEmpty,
      "glusterFS present in storageclass",
      "glusterFS is NOT present in storageclass",
    )),
  ))?;

  catalog.register(Check::new(
    "check_cephfs",
    "cephfs storage class is present",
    Targets::Local,
    Probe::Command(CommandProbe::new(
      format!("{kubectl} get storageclass -A | grep cephfs 2>/dev/null"),
      Predicate::NonEmpty,
      "cephfs present in storageclass",
      "cephfs is NOT present in storageclass",
    )),
  ))?;

  let cni_dir = Variants::new("/etc/cni/net.d").on(Platform::Os, "/etc/kubernetes/cni/net.d");
  catalog.register(Check::new(
    "check_multus",
    "multus CNI is configured on the worker nodes",
    Targets::Group(GroupName::Workers),
    Probe::Command(CommandProbe::new(
      format!("sudo ls {} | grep multus", cni_dir.resolve(env)),
      Predicate::NonEmpty,
      "multus enabled",
      "does not seem to have multus installed/enabled",
    )),
  ))?;

  for (name, feature) in [
    ("check_worker_node_udp_tnl_segmentation_off", "tx-udp_tnl-segmentation"),
    ("check_worker_node_udp_tnl_csum_off", "tx-udp_tnl-csum-segmentation"),
  ] {
    catalog.register(Check::new(
      name,
      format!("{feature} offload is disabled on bond0"),
      Targets::Group(GroupName::Workers),
      Probe::Command(
        CommandProbe::new(
          format!("ethtool -k bond0 | grep \"{feature}: \" | awk '{{printf $2}}'"),
          Predicate::in_set(["off"]),
          "has correct setting",
          format!("does not have {feature}: off"),
        )
        .show_value(format!(" -> {feature}: ")),
      ),
    ))?;
  }

  let mut checks = names(&["check_istio", "check_glusterfs", "check_multus"]);
  if config.requires_udp_tunnel_offload_off() {
    checks.extend(names(&[
      "check_worker_node_udp_tnl_segmentation_off",
      "check_worker_node_udp_tnl_csum_off",
    ]));
  }

  catalog.add_category("global", checks)
}

fn istio_steps(config: &Config, env: &Environment) -> Vec<Step> {
  let kubectl = &config.kubectl;
  let namespace = &config.istio.namespace;
  let gateway = &config.istio.ingressgateway;

  let mut steps = vec![
    Step::require(
      format!("{kubectl} get svc -n {namespace} 2>/dev/null"),
      format!("istio-system namespace '{namespace}' exists"),
      format!("istio-system namespace {namespace} missing"),
    ),
    Step::require(
      format!("{kubectl} describe svc -n {namespace} {gateway}"),
      format!("istio-ingressgateway pod '{gateway}' exists in {namespace} namespace"),
      format!("istio-ingressgateway pod '{gateway}' missing in {namespace} namespace"),
    ),
  ];

  if env.platform == Platform::Os {
    steps.extend([
      Step::require(
        format!("{kubectl} get ServiceMeshControlPlane -n {namespace} -o yaml | grep 'ior_enabled: true' 2>/dev/null"),
        "istio-ingressgateway flag ior_enabled set to true",
        "istio-ingressgateway flag ior_enabled not set to true",
      ),
      Step::inform(
        format!(
          "{kubectl} get csv -n openshift-operators `{kubectl} get csv -n openshift-operators | grep servicemeshoperator | awk '{{print $1}}'` -o custom-columns=vers:spec.version | tail -1"
        ),
        "Red Hat Service Mesh version: ",
        "could not find the Red Hat Service Mesh version",
      ),
      Step::inform(
        format!(
          "{kubectl} rsh -n openshift-operators `{kubectl} get pods -n openshift-operators | grep istio-operator- | awk '{{print $1}}'` env | grep ISTIO_VERSION | cut -d'=' -f2"
        ),
        "istio version in istio-operator POD: ",
        "could not read istio version in istio-operator POD",
      ),
      Step::require(
        format!("{kubectl} get ServiceMeshMemberRoll -n {namespace} -o yaml | sed -n '/^  spec/,/status/p' | grep nrd"),
        format!("NRD: entry present in the ServiceMeshMemberRoll in namespace {namespace}"),
        format!("NRD: no entry for nrd in the ServiceMeshMemberRoll in namespace {namespace}"),
      ),
    ]);
  }

  if config.istio.check_nrd {
    steps.extend([
      Step::detail(
        format!("{kubectl} get svc {gateway} -n {namespace} -o custom-columns=type:.spec.type | tail -1"),
        "NRD: istio-ingressgateway service created as type: ",
        "NRD: istio-ingressgateway service type unknown",
      ),
      Step::detail(
        format!(
          "{kubectl} get service {gateway} -n {namespace} -o jsonpath='{{range .spec.ports[*]}}{{.name}}{{\" \"}}{{.nodePort}}{{\"\\n\"}}{{end}}' | grep http2"
        ),
        format!("NRD: {gateway} is listening for http2 traffic on: "),
        format!("NRD: {gateway} is NOT listening for http2 traffic !! "),
      ),
    ]);

    if env.platform == Platform::Os {
      steps.push(Step::detail(
        format!(
          "{kubectl} get routes -n {namespace} | egrep '^{}-nrd-' | awk '{{print $2}}'",
          config.nrd.namespace
        ),
        "NRD: host kubectl router created in istio-system for nrd: ",
        "NRD: no route created in istio-system for nrd",
      ));
    }
  }

  steps
}
