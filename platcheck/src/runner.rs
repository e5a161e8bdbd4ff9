//! Executes checks against their targets and records the outcome in the report
use std::{
  collections::BTreeMap,
  io::{self, Write},
};

use anyhow::{anyhow, Result};
use regex_lite::Regex;
use tracing::{debug, info};

use crate::{
  catalog::{Check, CommandProbe, InterfaceProbe, InterfaceStep, Probe, Step, StepKind, Targets},
  exec::{Executor, Outcome, Target},
  nodes::{GroupName, TargetGroups},
  report::{Level, Line, Mark, ReportBuilder, Section},
  utils::ljust,
};

const PROGRESS_WIDTH: usize = 40;
const PROGRESS_NAME_WIDTH: usize = 70;

/// How far a failing check is pursued
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
  /// Stop probing at the first failing target
  FailFast,
  /// Probe every target and record each result
  Accumulate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
  Ok,
  Nok,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
  /// Required setting missing or no nodes to probe
  Configuration,
  /// The command could not be run or failed on the target
  RemoteExecution,
  /// The command ran but its output did not satisfy the check
  PredicateMismatch,
}

/// Result of a check on one target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetOutcome {
  pub target: Target,
  pub passed: bool,
  pub message: String,
  pub kind: Option<FailureKind>,
}

impl TargetOutcome {
  fn pass(target: &Target, message: impl Into<String>) -> Self {
    Self {
      target: target.clone(),
      passed: true,
      message: message.into(),
      kind: None,
    }
  }

  fn fail(target: &Target, kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      target: target.clone(),
      passed: false,
      message: message.into(),
      kind: Some(kind),
    }
  }
}

/// Aggregated result of one check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
  pub name: String,
  pub status: Status,
  pub targets: Vec<TargetOutcome>,
  /// Message of the first failing target
  pub failure: Option<String>,
}

impl CheckResult {
  fn from_outcomes(name: &str, targets: Vec<TargetOutcome>) -> Self {
    let failure = targets.iter().find(|t| !t.passed).map(|t| t.message.clone());

    Self {
      name: name.to_string(),
      status: match failure {
        Some(_) => Status::Nok,
        None => Status::Ok,
      },
      targets,
      failure,
    }
  }

  /// Category of the first failure
  pub fn failure_kind(&self) -> Option<FailureKind> {
    self.targets.iter().find_map(|t| t.kind)
  }
}

/// Runs checks one after another; only one command is in flight at a time
pub struct Runner<'a, E: Executor> {
  executor: &'a E,
  groups: &'a TargetGroups,
  mode: Mode,
  progress: bool,
}

impl<'a, E: Executor> Runner<'a, E> {
  pub fn new(executor: &'a E, groups: &'a TargetGroups, mode: Mode) -> Self {
    Self {
      executor,
      groups,
      mode,
      progress: false,
    }
  }

  /// Draw a progress bar on stderr while running
  pub fn with_progress(mut self, progress: bool) -> Self {
    self.progress = progress;
    self
  }

  pub fn run(&self, checks: &[&Check], report: &mut ReportBuilder) {
    let total = checks.len();

    for (i, check) in checks.iter().enumerate() {
      if self.progress {
        draw_progress(i + 1, total, &check.name);
      }

      let result = self.run_check(check, report);
      match &result.failure {
        Some(failure) => info!("{} NOK: {failure}", result.name),
        None => debug!("{} OK", result.name),
      }
      report.record(result);
    }

    if self.progress {
      eprintln!();
    }
  }

  /// Run one check, appending its detail lines to the report
  pub fn run_check(&self, check: &Check, report: &mut ReportBuilder) -> CheckResult {
    report.append(Section::Detail, Line::check(&check.name));

    let outcomes = match &check.probe {
      Probe::GroupPopulated { group, labels } => vec![self.group_populated(*group, labels, report)],
      Probe::Steps(steps) => vec![self.steps(steps, report)],
      probe => match self.resolve(check, probe) {
        Err(message) => {
          report.append(Section::Detail, Line::new(Level::Target, &message, Mark::Failed));
          vec![TargetOutcome::fail(&Target::Local, FailureKind::Configuration, message)]
        }
        Ok(targets) => self.probe_targets(&targets, probe, report),
      },
    };

    CheckResult::from_outcomes(&check.name, outcomes)
  }

  fn resolve(&self, check: &Check, probe: &Probe) -> std::result::Result<Vec<Target>, String> {
    if let Some(setting) = probe.missing_setting() {
      return Err(format!("{setting} is empty in configuration"));
    }

    match check.targets {
      Targets::Local => Ok(vec![Target::Local]),
      Targets::Group(group) => match self.groups.targets(group) {
        targets if targets.is_empty() => Err(format!("no nodes found in target group {group}")),
        targets => Ok(targets),
      },
    }
  }

  fn probe_targets(&self, targets: &[Target], probe: &Probe, report: &mut ReportBuilder) -> Vec<TargetOutcome> {
    let mut outcomes = Vec::new();

    for target in targets {
      let outcome = match probe {
        Probe::Command(command) => self.command(target, command, report),
        Probe::Sysctl { expected, .. } => self.sysctl(target, expected, report),
        Probe::Interfaces(interfaces) => self.interfaces(target, interfaces, report),
        Probe::Steps(_) | Probe::GroupPopulated { .. } => continue,
      };

      let failed = !outcome.passed;
      outcomes.push(outcome);
      if failed && self.mode == Mode::FailFast {
        break;
      }
    }

    outcomes
  }

  fn command(&self, target: &Target, probe: &CommandProbe, report: &mut ReportBuilder) -> TargetOutcome {
    let prefix = node_prefix(target);

    let outcome = match self.executor.execute(target, &probe.command, probe.strip) {
      Outcome::Error(reason) => TargetOutcome::fail(target, FailureKind::RemoteExecution, format!("{prefix}{reason}")),
      Outcome::Empty => TargetOutcome::fail(
        target,
        FailureKind::PredicateMismatch,
        format!("{prefix}{}", probe.failure),
      ),
      Outcome::Success(output) => match probe.predicate.evaluate(&output) {
        Err(e) => TargetOutcome::fail(target, FailureKind::PredicateMismatch, format!("{prefix}{e}")),
        Ok(verdict) => {
          let message = match verdict.pass {
            true => &probe.success,
            false => &probe.failure,
          };
          let message = match &probe.value_label {
            Some(label) => format!("{prefix}{message}{label}{}", verdict.value),
            None => format!("{prefix}{message}"),
          };

          match verdict.pass {
            true => TargetOutcome::pass(target, message),
            false => TargetOutcome::fail(target, FailureKind::PredicateMismatch, message),
          }
        }
      },
    };

    report.append(
      Section::Detail,
      Line::new(Level::Target, &outcome.message, Mark::from_pass(outcome.passed)),
    );
    outcome
  }

  fn group_populated(&self, group: GroupName, labels: &str, report: &mut ReportBuilder) -> TargetOutcome {
    let outcome = match self.groups.hosts(group).len() {
      0 => TargetOutcome::fail(
        &Target::Local,
        FailureKind::Configuration,
        format!("There are no nodes labeled: {labels}"),
      ),
      n => TargetOutcome::pass(&Target::Local, format!("There are {n} nodes labeled with: {labels}")),
    };

    report.append(
      Section::Detail,
      Line::new(Level::Target, &outcome.message, Mark::from_pass(outcome.passed)),
    );
    outcome
  }

  /// Local step sequence; the first failing required step ends the check
  fn steps(&self, steps: &[Step], report: &mut ReportBuilder) -> TargetOutcome {
    let target = Target::Local;
    let mut last = String::new();

    for step in steps {
      match step.kind {
        StepKind::Require => match self.executor.execute(&target, &step.command, true) {
          Outcome::Success(_) => {
            report.append(Section::Detail, Line::new(Level::Target, &step.success, Mark::Ok));
            last = step.success.clone();
          }
          Outcome::Empty => {
            report.append(Section::Detail, Line::new(Level::Target, &step.failure, Mark::Failed));
            return TargetOutcome::fail(&target, FailureKind::PredicateMismatch, &step.failure);
          }
          Outcome::Error(reason) => {
            report.append(Section::Detail, Line::new(Level::Target, &reason, Mark::Failed));
            return TargetOutcome::fail(&target, FailureKind::RemoteExecution, reason);
          }
        },
        StepKind::Inform => match self.executor.execute(&target, &step.command, true) {
          Outcome::Success(value) => {
            report.append(
              Section::Detail,
              Line::new(Level::Target, &step.success, Mark::Value(value)),
            );
          }
          Outcome::Empty => report.append(Section::Detail, Line::new(Level::Target, &step.failure, Mark::Failed)),
          Outcome::Error(reason) => report.append(
            Section::Detail,
            Line::new(Level::Target, format!("{} ({reason})", step.failure), Mark::Failed),
          ),
        },
        StepKind::Detail => {
          if self.mode == Mode::FailFast {
            continue;
          }
          match self.executor.execute(&target, &step.command, true) {
            Outcome::Success(value) => report.append(
              Section::Detail,
              Line::new(Level::Item, &step.success, Mark::Value(value.replace('\n', ","))),
            ),
            Outcome::Empty => report.append(Section::Detail, Line::new(Level::Item, &step.failure, Mark::Failed)),
            Outcome::Error(reason) => report.append(
              Section::Detail,
              Line::new(Level::Item, format!("{} ({reason})", step.failure), Mark::Failed),
            ),
          }
        }
      }
    }

    TargetOutcome::pass(&target, last)
  }

  fn sysctl(&self, target: &Target, expected: &BTreeMap<String, String>, report: &mut ReportBuilder) -> TargetOutcome {
    let prefix = node_prefix(target);
    report.append(Section::Detail, Line::new(Level::Target, prefix.trim_end(), Mark::None));

    let output = match self.executor.execute(target, "sudo sysctl -a", false) {
      Outcome::Error(reason) => {
        report.append(Section::Detail, Line::new(Level::Item, &reason, Mark::Failed));
        return TargetOutcome::fail(target, FailureKind::RemoteExecution, format!("{prefix}{reason}"));
      }
      outcome => parse_sysctl(outcome.text()),
    };

    let mut failure = None;
    for (key, value) in expected {
      let (pass, message) = match output.get(key) {
        Some(actual) if actual == value => (true, format!("sysctl value: {key} = {actual}")),
        Some(actual) => (false, format!("sysctl value: {key} = {actual} -> not set to: {value}")),
        None => (false, format!("sysctl value: {key} does not exist in sysctl")),
      };
      report.append(Section::Detail, Line::new(Level::Item, &message, Mark::from_pass(pass)));

      if !pass {
        failure.get_or_insert(message);
        if self.mode == Mode::FailFast {
          break;
        }
      }
    }

    match failure {
      Some(message) => TargetOutcome::fail(target, FailureKind::PredicateMismatch, format!("{prefix}{message}")),
      None => TargetOutcome::pass(target, format!("{prefix}sysctl values OK")),
    }
  }

  fn interfaces(&self, target: &Target, probe: &InterfaceProbe, report: &mut ReportBuilder) -> TargetOutcome {
    let prefix = node_prefix(target);
    report.append(Section::Detail, Line::new(Level::Target, prefix.trim_end(), Mark::None));

    let mut failure: Option<(FailureKind, String)> = None;
    for interface in &probe.interfaces {
      report.append(
        Section::Detail,
        Line::new(Level::Item, format!("interface: {interface}"), Mark::None),
      );

      if let Err((kind, message)) = self.interface(target, interface, &probe.steps, report) {
        failure.get_or_insert((kind, format!("{prefix}interface: {interface} {message}")));
        if self.mode == Mode::FailFast {
          break;
        }
      }
    }

    match failure {
      Some((kind, message)) => TargetOutcome::fail(target, kind, message),
      None => TargetOutcome::pass(target, format!("{prefix}interfaces OK")),
    }
  }

  /// Run the step pipeline of one interface, stopping at the first failing step
  fn interface(
    &self,
    target: &Target,
    interface: &str,
    steps: &[InterfaceStep],
    report: &mut ReportBuilder,
  ) -> std::result::Result<(), (FailureKind, String)> {
    let mut address: Option<String> = None;
    let mut link: Option<String> = None;

    for step in steps {
      let output = match step {
        InterfaceStep::VirtualFunctions | InterfaceStep::TrustOn => {
          cached(&mut link, || self.fetch(target, &format!("sudo /usr/sbin/ip link show {interface}")))
        }
        _ => cached(&mut address, || self.fetch(target, &format!("sudo ip a show {interface}"))),
      };

      let (pass, message) = match output {
        Err(reason) => {
          report.append(Section::Detail, Line::new(Level::Step, &reason, Mark::Failed));
          return Err((FailureKind::RemoteExecution, reason));
        }
        Ok(output) => match evaluate_interface_step(step, interface, output) {
          Ok(verdict) => verdict,
          Err(e) => (false, e.to_string()),
        },
      };

      report.append(Section::Detail, Line::new(Level::Step, &message, Mark::from_pass(pass)));
      if !pass {
        return Err((FailureKind::PredicateMismatch, message));
      }
    }

    Ok(())
  }

  fn fetch(&self, target: &Target, command: &str) -> std::result::Result<String, String> {
    match self.executor.execute(target, command, false) {
      Outcome::Error(reason) => Err(reason),
      outcome => Ok(outcome.text().to_string()),
    }
  }
}

fn cached<'c, F>(slot: &'c mut Option<String>, fetch: F) -> std::result::Result<&'c str, String>
where
  F: FnOnce() -> std::result::Result<String, String>,
{
  if slot.is_none() {
    *slot = Some(fetch()?);
  }
  Ok(slot.as_deref().unwrap_or_default())
}

fn node_prefix(target: &Target) -> String {
  match target {
    Target::Local => String::new(),
    Target::Host(host) => format!("node: {host} "),
  }
}

fn evaluate_interface_step(step: &InterfaceStep, interface: &str, output: &str) -> Result<(bool, String)> {
  let verdict = match step {
    InterfaceStep::Up => match output.contains("state UP") {
      true => (true, "UP & RUNNING".to_string()),
      false => (false, format!("does not have interface: {interface} UP & RUNNING")),
    },
    InterfaceStep::MtuAbove(min) => match parse_mtu(output)? {
      mtu if mtu > *min => (true, format!("mtu = {mtu} (OK: is above: {min})")),
      mtu => (false, format!("mtu = {mtu} (NOK: is NOT above: {min})")),
    },
    InterfaceStep::MtuAtLeast(min) => match parse_mtu(output)? {
      mtu if mtu >= *min => (true, format!("mtu = {mtu} (OK: is above or equal to: {min})")),
      mtu => (false, format!("mtu = {mtu} (NOK: is NOT above: {min})")),
    },
    InterfaceStep::VirtualFunctions => match count_virtual_functions(output) {
      0 => (false, "number of VF functions = 0 (NOK: is not above 0)".to_string()),
      n => (true, format!("number of VF functions = {n} (OK: is above 0)")),
    },
    InterfaceStep::TrustOn => match output.contains("trust off") {
      true => (false, "trust off for some VFs (NOK: trust must be on for all VFs)".to_string()),
      false => (true, "trust on for all VFs".to_string()),
    },
  };

  Ok(verdict)
}

/// Interface MTU from `ip a show` / `ip link show` output
pub fn parse_mtu(output: &str) -> Result<i64> {
  let re = Regex::new(r"\bmtu (\d+)")?;

  let mtu = re
    .captures(output)
    .and_then(|c| c.get(1))
    .ok_or_else(|| anyhow!("unable to read mtu from interface"))?;

  Ok(mtu.as_str().parse::<i64>()?)
}

fn count_virtual_functions(output: &str) -> usize {
  output.lines().filter(|l| l.trim_start().starts_with("vf ")).count()
}

/// `key = value` lines of `sysctl -a`; the first occurrence of a key wins
pub fn parse_sysctl(output: &str) -> BTreeMap<String, String> {
  let mut values = BTreeMap::new();

  for line in output.lines() {
    if let Some((key, value)) = line.split_once('=') {
      values
        .entry(key.trim().to_string())
        .or_insert_with(|| value.trim().replace('\t', " "));
    }
  }

  values
}

fn draw_progress(current: usize, total: usize, name: &str) {
  let filled = match total {
    0 => 0,
    total => PROGRESS_WIDTH * current / total,
  };
  let bar = format!("{}{}", "#".repeat(filled), ".".repeat(PROGRESS_WIDTH - filled));

  let mut stderr = io::stderr().lock();
  // best effort
  let _ = write!(stderr, "\rProgress: [{bar}] {current}/{total} {}", ljust(name, PROGRESS_NAME_WIDTH, ' '));
  let _ = stderr.flush();
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;
  use crate::{exec::testing::ScriptedExecutor, nodes::Node, platform::Platform, predicate::Predicate};

  fn node(name: &str) -> Node {
    Node {
      name: name.to_string(),
      address: None,
      os_image: String::new(),
    }
  }

  fn groups(group: GroupName, hosts: &[&str]) -> TargetGroups {
    TargetGroups::from_groups([(group, hosts.iter().map(|h| node(h)).collect())], Platform::K8s)
  }

  fn multus() -> Check {
    Check::new(
      "check_multus",
      "",
      Targets::Group(GroupName::Workers),
      Probe::Command(CommandProbe::new(
        "ls /etc/cni/net.d | grep multus",
        Predicate::NonEmpty,
        "multus installed/enabled",
        "does not seem to have multus installed/enabled",
      )),
    )
  }

  fn host2_fails() -> ScriptedExecutor {
    ScriptedExecutor::new()
      .on(Some("w1"), "multus", Outcome::Success("00-multus.conf".to_string()))
      .on(Some("w3"), "multus", Outcome::Success("00-multus.conf".to_string()))
  }

  #[test]
  fn it_stops_at_first_failing_target() {
    let executor = host2_fails();
    let groups = groups(GroupName::Workers, &["w1", "w2", "w3"]);
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&multus(), &mut report);

    assert_eq!(result.status, Status::Nok);
    assert_eq!(
      result.failure.as_deref(),
      Some("node: w2 does not seem to have multus installed/enabled")
    );
    assert_eq!(executor.probed_hosts(), vec!["w1", "w2"]);
    assert_eq!(result.failure_kind(), Some(FailureKind::PredicateMismatch));
  }

  #[test]
  fn it_probes_every_target_when_accumulating() {
    let executor = host2_fails();
    let groups = groups(GroupName::Workers, &["w1", "w2", "w3"]);
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&multus(), &mut report);

    assert_eq!(result.status, Status::Nok);
    assert_eq!(result.targets.len(), 3);
    assert_eq!(
      result.targets.iter().map(|t| t.passed).collect::<Vec<_>>(),
      vec![true, false, true]
    );
    assert_eq!(
      result.failure.as_deref(),
      Some("node: w2 does not seem to have multus installed/enabled")
    );

    let detail = report.render(Section::Detail, 60);
    assert!(detail.starts_with("-> check_multus:\n"));
    assert_eq!(detail.matches(" OK\n").count(), 2);
    assert_eq!(detail.matches(" FAILED\n").count(), 1);
  }

  #[test]
  fn it_reports_remote_errors() {
    let executor = ScriptedExecutor::new().on(
      Some("w1"),
      "multus",
      Outcome::Error("SSH error occurred? (Connection refused)".to_string()),
    );
    let groups = groups(GroupName::Workers, &["w1"]);

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&multus(), &mut ReportBuilder::new());

    assert_eq!(
      result.failure.as_deref(),
      Some("node: w1 SSH error occurred? (Connection refused)")
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::RemoteExecution));
  }

  #[test]
  fn it_fails_on_empty_group() {
    let executor = ScriptedExecutor::new();
    let groups = groups(GroupName::Workers, &[]);

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&multus(), &mut ReportBuilder::new());

    assert_eq!(result.status, Status::Nok);
    assert_eq!(result.failure.as_deref(), Some("no nodes found in target group workers"));
    assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
    assert!(executor.calls.borrow().is_empty());
  }

  #[rstest]
  #[case("permissive", Status::Ok, "node: a1 has SELINUX setting OK -> SELINUX = permissive")]
  #[case("enforcing", Status::Nok, "node: a1 does not have SELINUX=permissive or disabled -> SELINUX = enforcing")]
  fn value_label_test(#[case] output: &str, #[case] status: Status, #[case] message: &str) {
    let executor = ScriptedExecutor::new().on(None, "SELINUX", Outcome::Success(output.to_string()));
    let groups = groups(GroupName::Amf, &["a1"]);
    let check = Check::new(
      "check_amf_worker_nodes_selinux_permissive",
      "",
      Targets::Group(GroupName::Amf),
      Probe::Command(
        CommandProbe::new(
          "cat /etc/selinux/config | egrep '^SELINUX='",
          Predicate::in_set(["permissive", "disabled"]),
          "has SELINUX setting OK",
          "does not have SELINUX=permissive or disabled",
        )
        .show_value(" -> SELINUX = "),
      ),
    );

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&check, &mut ReportBuilder::new());

    assert_eq!(result.status, status);
    assert_eq!(result.targets[0].message, message);
  }

  #[test]
  fn it_reports_non_integer_output() {
    let executor = ScriptedExecutor::new().on(None, "HugePages", Outcome::Success("n/a".to_string()));
    let groups = groups(GroupName::Cmg, &["c1"]);
    let check = Check::new(
      "check_cmg_hugepages",
      "",
      Targets::Group(GroupName::Cmg),
      Probe::Command(CommandProbe::new(
        "grep HugePages_Total",
        Predicate::AboveMin(1),
        "has HugePages enabled",
        "does not have HugePages enabled",
      )),
    );

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&check, &mut ReportBuilder::new());

    assert_eq!(result.failure.as_deref(), Some("node: c1 value 'n/a' is not an integer"));
  }

  #[rstest]
  #[case(&["w1", "w2"], Status::Ok, "There are 2 nodes labeled with: nrd=nrd1")]
  #[case(&[], Status::Nok, "There are no nodes labeled: nrd=nrd1")]
  fn group_populated_test(#[case] hosts: &[&str], #[case] status: Status, #[case] message: &str) {
    let executor = ScriptedExecutor::new();
    let groups = groups(GroupName::Nrd, hosts);
    let check = Check::new(
      "check_nrd_labels",
      "",
      Targets::Group(GroupName::Nrd),
      Probe::GroupPopulated {
        group: GroupName::Nrd,
        labels: "nrd=nrd1".to_string(),
      },
    );

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&check, &mut ReportBuilder::new());

    assert_eq!(result.status, status);
    assert_eq!(result.targets[0].message, message);
  }

  fn sysctl_check() -> Check {
    let expected = [
      ("net.ipv4.tcp_slow_start_after_idle", "0"),
      ("net.netfilter.nf_conntrack_udp_timeout", "30"),
      ("net.unknown", "1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Check::new(
      "check_nrd_worker_nodes_sysctl",
      "",
      Targets::Group(GroupName::Nrd),
      Probe::Sysctl {
        expected,
        setting: "nrd.sysctl".to_string(),
      },
    )
  }

  const SYSCTL: &str = "net.ipv4.tcp_slow_start_after_idle = 0\nnet.netfilter.nf_conntrack_udp_timeout = 60\n";

  #[test]
  fn it_compares_sysctl_values() {
    let executor = ScriptedExecutor::new().on(None, "sysctl -a", Outcome::Success(SYSCTL.to_string()));
    let groups = groups(GroupName::Nrd, &["n1"]);
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&sysctl_check(), &mut report);

    assert_eq!(
      result.failure.as_deref(),
      Some("node: n1 sysctl value: net.netfilter.nf_conntrack_udp_timeout = 60 -> not set to: 30")
    );
    insta::assert_snapshot!(report.render(Section::Detail, 80), @r###"
    -> check_nrd_worker_nodes_sysctl:
         node: n1
           sysctl value: net.ipv4.tcp_slow_start_after_idle = 0.......................... OK
           sysctl value: net.netfilter.nf_conntrack_udp_timeout = 60 -> not set to: 30... FAILED
           sysctl value: net.unknown does not exist in sysctl............................ FAILED
    "###);
  }

  #[test]
  fn it_stops_at_first_sysctl_mismatch() {
    let executor = ScriptedExecutor::new().on(None, "sysctl -a", Outcome::Success(SYSCTL.to_string()));
    let groups = groups(GroupName::Nrd, &["n1"]);
    let mut report = ReportBuilder::new();

    Runner::new(&executor, &groups, Mode::FailFast).run_check(&sysctl_check(), &mut report);

    let detail = report.render(Section::Detail, 80);
    assert!(!detail.contains("net.unknown"));
  }

  #[test]
  fn it_requires_configured_values() {
    let executor = ScriptedExecutor::new();
    let groups = groups(GroupName::Nrd, &["n1"]);
    let check = Check::new(
      "check_nrd_worker_nodes_sysctl",
      "",
      Targets::Group(GroupName::Nrd),
      Probe::Sysctl {
        expected: BTreeMap::new(),
        setting: "nrd.sysctl".to_string(),
      },
    );

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&check, &mut ReportBuilder::new());

    assert_eq!(result.failure.as_deref(), Some("nrd.sysctl is empty in configuration"));
    assert_eq!(result.failure_kind(), Some(FailureKind::Configuration));
    assert!(executor.calls.borrow().is_empty());
  }

  #[test]
  fn it_parses_sysctl_output() {
    let values = parse_sysctl("a.b = 1\nkernel.x =\t4096\t87380\na.b = 2\nno separator\n");

    assert_eq!(values.get("a.b").map(String::as_str), Some("1"));
    assert_eq!(values.get("kernel.x").map(String::as_str), Some("4096 87380"));
    assert_eq!(values.len(), 2);
  }

  const IP_ADDR: &str = "4: ens1f0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 9000 qdisc mq state UP group default qlen 1000";
  const IP_LINK: &str = "4: ens1f0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 9000 qdisc mq state UP\n    vf 0     link/ether 00:00:00:00:00:00, spoof checking on, link-state auto, trust on\n    vf 1     link/ether 00:00:00:00:00:00, spoof checking on, link-state auto, trust off\n";

  fn sriov_check(steps: Vec<InterfaceStep>) -> Check {
    Check::new(
      "check_cmg_worker_nodes_sriov_interfaces",
      "",
      Targets::Group(GroupName::CmgSriov),
      Probe::Interfaces(InterfaceProbe {
        interfaces: vec!["ens1f0".to_string()],
        steps,
        setting: "cmg.sriov_interfaces".to_string(),
      }),
    )
  }

  #[test]
  fn it_runs_interface_pipeline() {
    let executor = ScriptedExecutor::new()
      .on(None, "ip a show ens1f0", Outcome::Success(IP_ADDR.to_string()))
      .on(None, "ip link show ens1f0", Outcome::Success(IP_LINK.to_string()));
    let groups = groups(GroupName::CmgSriov, &["c1"]);
    let check = sriov_check(vec![
      InterfaceStep::Up,
      InterfaceStep::MtuAbove(8900),
      InterfaceStep::VirtualFunctions,
      InterfaceStep::TrustOn,
    ]);
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&check, &mut report);

    assert_eq!(
      result.failure.as_deref(),
      Some("node: c1 interface: ens1f0 trust off for some VFs (NOK: trust must be on for all VFs)")
    );
    // address and link output are fetched once each
    assert_eq!(executor.calls.borrow().len(), 2);

    let detail = report.render(Section::Detail, 80);
    assert!(detail.contains("       interface: ens1f0\n"));
    assert!(detail.contains("mtu = 9000 (OK: is above: 8900)"));
    assert!(detail.contains("number of VF functions = 2 (OK: is above 0)"));
  }

  #[test]
  fn it_stops_interface_pipeline_when_down() {
    let executor = ScriptedExecutor::new().on(
      None,
      "ip a show ens1f0",
      Outcome::Success("4: ens1f0: <BROADCAST> mtu 1500 state DOWN".to_string()),
    );
    let groups = groups(GroupName::CmgSriov, &["c1"]);
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(
      &sriov_check(vec![InterfaceStep::Up, InterfaceStep::MtuAbove(8900)]),
      &mut report,
    );

    assert_eq!(
      result.failure.as_deref(),
      Some("node: c1 interface: ens1f0 does not have interface: ens1f0 UP & RUNNING")
    );
    assert!(!report.render(Section::Detail, 80).contains("mtu ="));
  }

  #[rstest]
  #[case(IP_ADDR, 9000)]
  #[case("2: tunl0@NONE: <NOARP,UP,LOWER_UP> mtu 1480 qdisc noqueue state UNKNOWN", 1480)]
  fn parse_mtu_test(#[case] output: &str, #[case] expected: i64) {
    assert_eq!(parse_mtu(output).unwrap(), expected);
  }

  #[test]
  fn it_rejects_output_without_mtu() {
    assert!(parse_mtu("Device \"eth9\" does not exist.").is_err());
  }

  fn istio() -> Check {
    Check::new(
      "check_istio",
      "",
      Targets::Local,
      Probe::Steps(vec![
        Step::require("get ns istio-system", "istio namespace exists", "istio namespace not found"),
        Step::inform("istio version", "istio version: ", "istio version not found"),
        Step::require("get svc istio-ingressgateway", "ingressgateway exists", "ingressgateway not found"),
        Step::detail("http2 ports", "http2 ports: ", "no http2 ports"),
      ]),
    )
  }

  #[test]
  fn it_runs_steps_in_order() {
    let executor = ScriptedExecutor::new()
      .on(None, "get ns", Outcome::Success("istio-system Active".to_string()))
      .on(None, "get svc", Outcome::Success("istio-ingressgateway".to_string()))
      .on(None, "http2", Outcome::Success("80\n8080".to_string()));
    let groups = TargetGroups::default();
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&istio(), &mut report);

    assert_eq!(result.status, Status::Ok);
    let detail = report.render(Section::Detail, 40);
    assert!(detail.contains("istio version not found"));
    assert!(detail.contains(" 80,8080\n"));
  }

  #[test]
  fn it_stops_steps_at_first_required_failure() {
    let executor = ScriptedExecutor::new().on(None, "get ns", Outcome::Success("istio-system Active".to_string()));
    let groups = TargetGroups::default();

    let result = Runner::new(&executor, &groups, Mode::FailFast).run_check(&istio(), &mut ReportBuilder::new());

    assert_eq!(result.failure.as_deref(), Some("ingressgateway not found"));
    let commands = executor.calls.borrow().iter().map(|(_, c)| c.clone()).collect::<Vec<_>>();
    assert_eq!(commands, vec!["get ns istio-system", "istio version", "get svc istio-ingressgateway"]);
  }

  #[test]
  fn it_keeps_the_reason_of_failed_informational_steps() {
    let executor = ScriptedExecutor::new()
      .on(None, "get ns", Outcome::Success("istio-system Active".to_string()))
      .on(None, "istio version", Outcome::Error("command not found: istioctl".to_string()))
      .on(None, "get svc", Outcome::Success("istio-ingressgateway".to_string()))
      .on(None, "http2", Outcome::Error("error: the server doesn't have a resource type".to_string()));
    let groups = TargetGroups::default();
    let mut report = ReportBuilder::new();

    let result = Runner::new(&executor, &groups, Mode::Accumulate).run_check(&istio(), &mut report);

    assert_eq!(result.status, Status::Ok);
    let detail = report.render(Section::Detail, 40);
    assert!(detail.contains("istio version not found (command not found: istioctl)"));
    assert!(detail.contains("no http2 ports (error: the server doesn't have a resource type)"));
  }

  #[test]
  fn it_records_results_in_order() {
    let executor = host2_fails();
    let groups = groups(GroupName::Workers, &["w1"]);
    let mut second = multus();
    second.name = "check_multus_again".to_string();
    let mut report = ReportBuilder::new();

    Runner::new(&executor, &groups, Mode::FailFast).run(&[&multus(), &second], &mut report);

    let names = report.results().iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["check_multus", "check_multus_again"]);
    assert_eq!(report.failed(), 0);
  }
}
