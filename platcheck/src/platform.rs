use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Kubernetes distribution the network functions are deployed on
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
  /// Nokia Container Services
  Ncs,
  /// Red Hat OpenShift
  Os,
  /// Google Cloud Platform (Anthos)
  Gcp,
  /// Ericsson Cloud Container Distribution
  Eccd,
  /// Native Kubernetes
  K8s,
}

impl Default for Platform {
  fn default() -> Self {
    Self::K8s
  }
}

impl Platform {
  pub fn display_name(&self) -> &'static str {
    match self {
      Self::Ncs => "NCS",
      Self::Os => "OpenShift",
      Self::Gcp => "Google Cloud Platform (Anthos)",
      Self::Eccd => "Ericsson CCD platform",
      Self::K8s => "native k8s platform",
    }
  }

  /// Nodes are reached over SSH by their internal IP rather than their name
  pub fn ssh_by_address(&self) -> bool {
    matches!(self, Self::Eccd)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Ncs => write!(f, "ncs"),
      Self::Os => write!(f, "os"),
      Self::Gcp => write!(f, "gcp"),
      Self::Eccd => write!(f, "eccd"),
      Self::K8s => write!(f, "k8s"),
    }
  }
}

/// Operating system family of the worker nodes, derived from the node's `osImage`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OsFamily {
  /// Red Hat Enterprise Linux or CentOS
  RhelLike,
  /// SUSE Linux Enterprise
  Suse,
  #[default]
  Other,
}

impl OsFamily {
  pub fn from_os_image(os_image: &str) -> Self {
    if os_image.contains("Red Hat") || os_image.contains("CentOS") {
      Self::RhelLike
    } else if os_image.to_lowercase().contains("suse linux") {
      Self::Suse
    } else {
      Self::Other
    }
  }
}

/// Run-wide facts used to pick platform specific variants of a check
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
  pub platform: Platform,
  pub os: OsFamily,
}

/// Strategy table holding a default value and overrides keyed by platform or OS family
///
/// OS family overrides win over platform overrides, which win over the default
#[derive(Clone, Debug, PartialEq)]
pub struct Variants<T> {
  default: T,
  platforms: Vec<(Platform, T)>,
  os: Vec<(OsFamily, T)>,
}

impl<T> Variants<T> {
  pub fn new(default: T) -> Self {
    Self {
      default,
      platforms: Vec::new(),
      os: Vec::new(),
    }
  }

  pub fn on(mut self, platform: Platform, value: T) -> Self {
    self.platforms.push((platform, value));
    self
  }

  pub fn on_os(mut self, os: OsFamily, value: T) -> Self {
    self.os.push((os, value));
    self
  }

  pub fn resolve(&self, env: &Environment) -> &T {
    if let Some((_, value)) = self.os.iter().find(|(os, _)| *os == env.os) {
      return value;
    }

    match self.platforms.iter().find(|(platform, _)| *platform == env.platform) {
      Some((_, value)) => value,
      None => &self.default,
    }
  }
}
