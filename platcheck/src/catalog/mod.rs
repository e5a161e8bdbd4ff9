//! Check descriptors, the registry holding them and run list selection
mod amf;
mod cmg;
mod global;
mod nrd;

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use crate::{
  config::Config,
  nodes::GroupName,
  platform::{Environment, Platform, Variants},
  predicate::Predicate,
};

/// Prefix reserved for checks shown by `platcheck list`
pub const CHECK_PREFIX: &str = "check_";

/// Where a check's commands are executed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Targets {
  /// Once, on the machine running platcheck
  Local,
  /// On every node of the group, over SSH
  Group(GroupName),
}

impl std::fmt::Display for Targets {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Local => write!(f, "local"),
      Self::Group(group) => write!(f, "{group}"),
    }
  }
}

/// Single command whose output is evaluated with a predicate
#[derive(Clone, Debug, PartialEq)]
pub struct CommandProbe {
  pub command: String,
  pub predicate: Predicate,
  /// Trim trailing whitespace from the output before evaluation
  pub strip: bool,
  pub success: String,
  pub failure: String,
  /// Text placed between the message and the returned value, e.g. ` -> SELINUX = `
  ///
  /// The value is only embedded in the message when set
  pub value_label: Option<String>,
}

impl CommandProbe {
  pub fn new(command: impl Into<String>, predicate: Predicate, success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      predicate,
      strip: false,
      success: success.into(),
      failure: failure.into(),
      value_label: None,
    }
  }

  /// Embed the returned value in the messages, right-stripped
  pub fn show_value(mut self, label: impl Into<String>) -> Self {
    self.value_label = Some(label.into());
    self.strip = true;
    self
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
  /// Empty output fails the check and stops the sequence
  Require,
  /// Records the output as a value; never fails the check
  Inform,
  /// Like `Inform`, only run when every target is probed
  Detail,
}

/// One step of a local multi-step check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
  pub kind: StepKind,
  pub command: String,
  pub success: String,
  pub failure: String,
}

impl Step {
  pub fn require(command: impl Into<String>, success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self::new(StepKind::Require, command, success, failure)
  }

  pub fn inform(command: impl Into<String>, success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self::new(StepKind::Inform, command, success, failure)
  }

  pub fn detail(command: impl Into<String>, success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self::new(StepKind::Detail, command, success, failure)
  }

  fn new(kind: StepKind, command: impl Into<String>, success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self {
      kind,
      command: command.into(),
      success: success.into(),
      failure: failure.into(),
    }
  }
}

/// Verification applied to a network interface, in pipeline order
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterfaceStep {
  /// `ip a show` reports `state UP`
  Up,
  /// MTU strictly above the bound
  MtuAbove(i64),
  /// MTU greater than or equal to the bound
  MtuAtLeast(i64),
  /// At least one SR-IOV virtual function
  VirtualFunctions,
  /// No virtual function in `trust off` mode
  TrustOn,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceProbe {
  pub interfaces: Vec<String>,
  pub steps: Vec<InterfaceStep>,
  /// Configuration key reported when `interfaces` is empty
  pub setting: String,
}

/// How a check probes its targets
#[derive(Clone, Debug, PartialEq)]
pub enum Probe {
  Command(CommandProbe),
  /// Sequence of local commands
  Steps(Vec<Step>),
  /// `group` must not be empty; `labels` is shown in the messages
  GroupPopulated { group: GroupName, labels: String },
  /// Every key of the map must be set to the expected value in `sysctl -a`
  Sysctl {
    expected: BTreeMap<String, String>,
    /// Configuration key reported when `expected` is empty
    setting: String,
  },
  Interfaces(InterfaceProbe),
}

impl Probe {
  /// Configuration key the probe needs but was left empty
  pub fn missing_setting(&self) -> Option<&str> {
    match self {
      Self::Sysctl { expected, setting } if expected.is_empty() => Some(setting),
      Self::Interfaces(probe) if probe.interfaces.is_empty() => Some(&probe.setting),
      _ => None,
    }
  }
}

/// Declarative description of one check
#[derive(Clone, Debug, PartialEq)]
pub struct Check {
  /// Unique, stable identifier used for selection and skip lists
  pub name: String,
  pub description: String,
  pub targets: Targets,
  pub probe: Probe,
}

impl Check {
  pub fn new(name: impl Into<String>, description: impl Into<String>, targets: Targets, probe: Probe) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      targets,
      probe,
    }
  }

  /// Internal entries are selectable by name but not listed
  pub fn is_listable(&self) -> bool {
    self.name.starts_with(CHECK_PREFIX)
  }
}

/// Named list of checks run by default
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Category {
  pub name: &'static str,
  pub checks: Vec<String>,
}

/// Registry of all known checks, keyed by name
#[derive(Clone, Debug, Default)]
pub struct Catalog {
  checks: Vec<Check>,
  index: HashMap<String, usize>,
  categories: Vec<Category>,
}

impl Catalog {
  /// Build the registry and default categories for the given configuration
  pub fn from_config(config: &Config, env: &Environment) -> Result<Self> {
    let mut catalog = Self::default();

    global::register(&mut catalog, config, env)?;
    nrd::register(&mut catalog, config, env)?;
    amf::register(&mut catalog, config, env)?;
    cmg::register(&mut catalog, config, env)?;

    catalog.register(Check::new(
      "selftest_ssh_reachable",
      "Worker nodes accept SSH logins",
      Targets::Group(GroupName::Workers),
      Probe::Command(CommandProbe::new(
        "echo reachable",
        Predicate::NonEmpty,
        "reachable over SSH",
        "is not reachable over SSH",
      )),
    ))?;

    Ok(catalog)
  }

  pub fn register(&mut self, check: Check) -> Result<()> {
    if self.index.contains_key(&check.name) {
      bail!("Check {} is registered more than once", check.name);
    }

    self.index.insert(check.name.clone(), self.checks.len());
    self.checks.push(check);
    Ok(())
  }

  /// Add a default category; every member must already be registered
  pub fn add_category(&mut self, name: &'static str, checks: Vec<String>) -> Result<()> {
    if let Some(missing) = checks.iter().find(|c| !self.index.contains_key(c.as_str())) {
      bail!("Category {name} references unknown check {missing}");
    }

    self.categories.push(Category { name, checks });
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&Check> {
    self.index.get(name).map(|i| &self.checks[*i])
  }

  /// Checks shown to users, sorted by name
  pub fn listable(&self) -> Vec<&Check> {
    let mut checks = self.checks.iter().filter(|c| c.is_listable()).collect::<Vec<_>>();
    checks.sort_by(|a, b| a.name.cmp(&b.name));
    checks
  }

  pub fn categories(&self) -> &[Category] {
    &self.categories
  }
}

/// Ordered checks selected for a run
#[derive(Debug)]
pub struct RunList<'a> {
  pub checks: Vec<&'a Check>,
  /// Skip list entries that do not name a known check
  pub unknown_skips: Vec<String>,
}

impl RunList<'_> {
  pub fn names(&self) -> Vec<&str> {
    self.checks.iter().map(|c| c.name.as_str()).collect()
  }
}

/// Select the checks to run
///
/// A selected check is run alone, regardless of skip list and categories. Otherwise the
/// categories are concatenated (first occurrence wins), then skipped checks are removed
pub fn build_run_list<'a>(
  catalog: &'a Catalog,
  skip: &[String],
  selected: Option<&str>,
  alphabetical: bool,
) -> Result<RunList<'a>> {
  if let Some(name) = selected {
    let check = catalog
      .get(name)
      .ok_or_else(|| anyhow!("Unknown check {name}; run `platcheck list` to see the available checks"))?;

    return Ok(RunList {
      checks: vec![check],
      unknown_skips: Vec::new(),
    });
  }

  let unknown_skips = skip
    .iter()
    .filter(|name| catalog.get(name).is_none())
    .cloned()
    .collect::<Vec<_>>();

  let skip = skip.iter().map(String::as_str).collect::<HashSet<_>>();
  let mut seen = HashSet::new();
  let mut checks = Vec::new();

  for category in catalog.categories() {
    for name in &category.checks {
      if skip.contains(name.as_str()) || !seen.insert(name.as_str()) {
        continue;
      }
      if let Some(check) = catalog.get(name) {
        checks.push(check);
      }
    }
  }

  if alphabetical {
    checks.sort_by(|a, b| a.name.cmp(&b.name));
  }
  debug!("Run list: {:?}", checks.iter().map(|c| &c.name).collect::<Vec<_>>());

  Ok(RunList { checks, unknown_skips })
}

/// Shorthand used by the category modules
fn names(names: &[&str]) -> Vec<String> {
  names.iter().map(|n| n.to_string()).collect()
}

/// Static CPU manager policy, read from wherever the platform's kubelet keeps it
fn cpu_pinning(env: &Environment) -> Probe {
  let (command, success, failure) = *Variants::new((
    "sudo cat /var/lib/kubelet/cpu_manager_state | grep static",
    "has policyName: static",
    "does not have policyName: static",
  ))
  .on(
    Platform::Os,
    (
      "sudo cat /etc/kubernetes/kubelet.conf | grep cpuManagerPolicy | grep static",
      "has cpuManagerPolicy: static",
      "does not have cpuManagerPolicy: static",
    ),
  )
  .resolve(env);

  Probe::Command(CommandProbe::new(command, Predicate::NonEmpty, success, failure))
}

#[derive(Copy, Clone, Debug)]
enum Bound {
  Max(i64),
  Min(i64),
}

/// Socket buffer sysctl compared against a bound, e.g. `net.core.rmem_max`
fn socket_buffer(function: &str, group: GroupName, key: &str, bound: Bound) -> Check {
  let short = key.rsplit('.').next().unwrap_or(key);
  let (predicate, failure) = match bound {
    Bound::Max(max) => (Predicate::BelowMax(max), format!("does not have {key} below: {max}")),
    Bound::Min(min) => (Predicate::AboveMin(min), format!("does not have {key} above: {min}")),
  };

  Check::new(
    format!("check_{function}_worker_nodes_{short}_socket_buffer"),
    format!("{key} socket buffer is {predicate}"),
    Targets::Group(group),
    Probe::Command(
      CommandProbe::new(format!("sudo sysctl -n {key}"), predicate, format!("{key} OK"), failure)
        .show_value(format!(" -> {key} = ")),
    ),
  )
}
