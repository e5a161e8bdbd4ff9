use std::{
  collections::BTreeMap,
  fs,
  path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::{platform::Platform, Assets};

/// Configuration file picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "platcheck.yaml";

/// Name of the embedded default configuration
pub const EMBEDDED_CONFIG: &str = "platcheck.yaml";

/// Full parameter set for a run; immutable once loaded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Target platform
  pub platform: Platform,

  /// Prefix used to invoke kubectl (e.g. `sudo KUBECONFIG=$KUBECONFIG kubectl`)
  pub kubectl: String,

  pub ssh: SshConfig,

  /// Container runtime of the worker nodes (`containerd`, `docker`, `cri-o`)
  pub container_runtime: String,

  /// Worker node NIC brand (e.g. `Intel`, `Mellanox`)
  pub nic_brand: String,

  /// Kubernetes CNI (e.g. `calico`, `cilium`)
  pub k8s_cni: String,

  /// Nodes excluded from every target group
  pub nodes_to_skip: Vec<String>,

  /// Checks removed from the run list
  pub checks_to_skip: Vec<String>,

  /// Run checks in alphabetical order instead of catalog order
  pub run_checks_alphabetically: bool,

  pub report: ReportConfig,
  pub labels: LabelConfig,
  pub istio: IstioConfig,
  pub nrd: NrdConfig,
  pub amf: AmfConfig,
  pub cmg: CmgConfig,

  /// File the configuration was read from; `None` for the embedded default
  #[serde(skip)]
  pub source: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
  /// User to log in to the worker nodes with
  pub username: String,

  /// Connect as `ssh <host>` and let ssh_config / the agent pick the user
  pub skip_username: bool,

  /// Private key used to log in to the worker nodes
  pub key: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
  /// Write a timestamped report file at the end of the run
  pub create_file: bool,
  pub directory: PathBuf,
  pub file_prefix: String,
  /// Column at which the status of a report line is printed
  pub dotline_length: usize,
  /// Width of the boxed section headers in the report file
  pub header_length: usize,
  /// Append target group membership to the console report
  pub show_extra_info: bool,
}

/// Node labels (`key=value`) defining each target group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
  pub worker: Vec<String>,
  pub nrd: Vec<String>,
  pub amf: Vec<String>,
  pub cmg: Vec<String>,
  /// Defaults to the CMG nodes when empty
  pub cmg_sriov: Vec<String>,
  /// Defaults to the CMG SR-IOV nodes when empty
  pub cmg_ipvlan: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IstioConfig {
  pub namespace: String,
  pub ingressgateway: String,
  /// Report how the ingress gateway is exposed for NRD
  pub check_nrd: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrdConfig {
  pub namespace: String,
  pub check_performance: bool,
  #[serde(deserialize_with = "scalar_map")]
  pub sysctl: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmfConfig {
  /// IPsec is only needed for 4G lawful interception
  pub check_ipsec: bool,
  pub ipvlan_interfaces: Vec<String>,
  #[serde(deserialize_with = "scalar_map")]
  pub sysctl: BTreeMap<String, String>,
  pub rmem_max: Option<i64>,
  pub wmem_max: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmgConfig {
  /// DPDK requires huge pages on the worker nodes
  pub deploy_with_dpdk: bool,
  #[serde(deserialize_with = "scalar_map")]
  pub sysctl: BTreeMap<String, String>,
  pub sriov_interfaces: Vec<String>,
  /// SR-IOV interface MTU must be strictly above this value
  pub sriov_mtu_min: i64,
  /// Require `trust on` for every virtual function
  pub sriov_trust_on: bool,
  pub ipvlan_interfaces: Vec<String>,
  /// Kubernetes cluster network interface (e.g. `tunl0` for calico, `cilium_host` for cilium)
  pub k8s_interface: Option<String>,
  /// Minimum MTU of the cluster network interface
  pub csf_mtu_size: i64,
  pub rmem_max: Option<i64>,
  pub wmem_max: Option<i64>,
  pub udp_rmem_min: Option<i64>,
  pub udp_wmem_min: Option<i64>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      platform: Platform::default(),
      kubectl: "kubectl".to_string(),
      ssh: SshConfig::default(),
      container_runtime: "containerd".to_string(),
      nic_brand: String::new(),
      k8s_cni: String::new(),
      nodes_to_skip: Vec::new(),
      checks_to_skip: Vec::new(),
      run_checks_alphabetically: true,
      report: ReportConfig::default(),
      labels: LabelConfig {
        worker: vec!["node-role.kubernetes.io/worker".to_string()],
        ..LabelConfig::default()
      },
      istio: IstioConfig::default(),
      nrd: NrdConfig::default(),
      amf: AmfConfig::default(),
      cmg: CmgConfig::default(),
      source: None,
    }
  }
}

impl Default for SshConfig {
  fn default() -> Self {
    Self {
      username: "core".to_string(),
      skip_username: false,
      key: None,
    }
  }
}

impl Default for ReportConfig {
  fn default() -> Self {
    Self {
      create_file: false,
      directory: PathBuf::from("report_history"),
      file_prefix: "platcheck".to_string(),
      dotline_length: 100,
      header_length: 115,
      show_extra_info: true,
    }
  }
}

impl Default for IstioConfig {
  fn default() -> Self {
    Self {
      namespace: "istio-system".to_string(),
      ingressgateway: "istio-ingressgateway".to_string(),
      check_nrd: true,
    }
  }
}

impl Default for NrdConfig {
  fn default() -> Self {
    Self {
      namespace: "nrd".to_string(),
      check_performance: false,
      sysctl: BTreeMap::new(),
    }
  }
}

impl Default for CmgConfig {
  fn default() -> Self {
    Self {
      deploy_with_dpdk: false,
      sysctl: BTreeMap::new(),
      sriov_interfaces: Vec::new(),
      sriov_mtu_min: 8900,
      sriov_trust_on: false,
      ipvlan_interfaces: Vec::new(),
      k8s_interface: None,
      csf_mtu_size: 9000,
      rmem_max: None,
      wmem_max: None,
      udp_rmem_min: None,
      udp_wmem_min: None,
    }
  }
}

impl Config {
  /// Load the configuration
  ///
  /// Uses `path` when given, otherwise `platcheck.yaml` in the working directory when present,
  /// otherwise the embedded default
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(path) => Some(path.to_path_buf()),
      None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    match path {
      Some(path) => {
        let contents = fs::read_to_string(&path).with_context(|| format!("Unable to read {}", path.display()))?;
        let mut config = Self::from_yaml(&contents).with_context(|| format!("Invalid configuration in {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        config.source = Some(path);
        Ok(config)
      }
      None => {
        warn!("No configuration file given and {DEFAULT_CONFIG_FILE} not found; using the embedded default");
        Self::from_yaml(&embedded_default()?)
      }
    }
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn to_yaml(&self) -> Result<String> {
    Ok(serde_yaml::to_string(self)?)
  }

  /// Where the configuration came from, for display
  pub fn source_name(&self) -> String {
    match &self.source {
      Some(path) => path.display().to_string(),
      None => format!("{EMBEDDED_CONFIG} (embedded)"),
    }
  }

  /// UDP tunnel offloads must be disabled with Intel NICs and the cilium CNI
  pub fn requires_udp_tunnel_offload_off(&self) -> bool {
    self.nic_brand.eq_ignore_ascii_case("intel") && self.k8s_cni.eq_ignore_ascii_case("cilium")
  }
}

/// Contents of the embedded default configuration
pub fn embedded_default() -> Result<String> {
  let file = Assets::get(EMBEDDED_CONFIG).ok_or_else(|| anyhow!("Embedded {EMBEDDED_CONFIG} is missing"))?;
  Ok(std::str::from_utf8(file.data.as_ref())?.to_string())
}

/// Deserialize a map whose values may be written as YAML strings, numbers or booleans
fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;

  raw
    .into_iter()
    .map(|(key, value)| match value {
      serde_yaml::Value::String(s) => Ok((key, s)),
      serde_yaml::Value::Number(n) => Ok((key, n.to_string())),
      serde_yaml::Value::Bool(b) => Ok((key, b.to_string())),
      other => Err(D::Error::custom(format!("{key}: expected a scalar value, found {other:?}"))),
    })
    .collect()
}
