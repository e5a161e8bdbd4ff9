use std::{
  fs,
  path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::{
  config::{Config, ReportConfig},
  exec::{Executor, Outcome, Target},
  nodes::{GroupName, TargetGroups},
  platform::Platform,
  runner::{CheckResult, Status},
  utils::ljust,
};

/// Width of the labels in the platform info and extra info sections
const LABEL_WIDTH: usize = 25;
const OVERVIEW_WIDTH: usize = 30;

/// Nesting of a detail line
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
  /// Unindented free text
  Plain,
  /// `-> <check>:`
  Check,
  /// Per target (or per local step) line
  Target,
  /// Per item of a target, e.g. one sysctl key or one interface
  Item,
  /// Per step of an item's pipeline
  Step,
}

impl Level {
  fn indent(&self) -> usize {
    match self {
      Self::Plain | Self::Check => 0,
      Self::Target => 5,
      Self::Item => 7,
      Self::Step => 11,
    }
  }
}

/// Status printed after the dot line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mark {
  /// No dot line
  None,
  Ok,
  Failed,
  Value(String),
}

impl Mark {
  pub fn from_pass(pass: bool) -> Self {
    match pass {
      true => Self::Ok,
      false => Self::Failed,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
  pub level: Level,
  pub text: String,
  pub mark: Mark,
}

impl Line {
  pub fn new(level: Level, text: impl Into<String>, mark: Mark) -> Self {
    Self {
      level,
      text: text.into(),
      mark,
    }
  }

  pub fn check(name: &str) -> Self {
    Self::new(Level::Check, name, Mark::None)
  }

  pub fn plain(text: impl Into<String>) -> Self {
    Self::new(Level::Plain, text, Mark::None)
  }

  /// Render the line; `dotline` is the column of the status of target level lines
  pub fn render(&self, dotline: usize) -> String {
    let indent = " ".repeat(self.level.indent());
    let width = (dotline + Level::Target.indent()).saturating_sub(self.level.indent());

    match (&self.level, &self.mark) {
      (Level::Plain, _) => self.text.clone(),
      (Level::Check, _) => format!("-> {}:", self.text),
      (_, Mark::None) => format!("{indent}{}", self.text),
      (_, Mark::Ok) => format!("{indent}{} OK", ljust(&self.text, width, '.')),
      (_, Mark::Failed) => format!("{indent}{} FAILED", ljust(&self.text, width, '.')),
      (_, Mark::Value(value)) => format!("{indent}{} {value}", ljust(&self.text, width, '.')),
    }
  }
}

impl From<String> for Line {
  fn from(text: String) -> Self {
    Self::plain(text)
  }
}

impl From<&str> for Line {
  fn from(text: &str) -> Self {
    Self::plain(text)
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
  /// Platform info
  Header,
  /// Per check detail
  Detail,
  /// Group membership, skipped nodes and checks
  Extra,
}

/// Append-only report of a run
#[derive(Debug, Default)]
pub struct ReportBuilder {
  header: Vec<Line>,
  detail: Vec<Line>,
  extra: Vec<Line>,
  results: Vec<CheckResult>,
  warnings: Vec<String>,
}

impl ReportBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, section: Section, line: impl Into<Line>) {
    let line = line.into();
    match section {
      Section::Header => self.header.push(line),
      Section::Detail => self.detail.push(line),
      Section::Extra => self.extra.push(line),
    }
  }

  pub fn record(&mut self, result: CheckResult) {
    self.results.push(result);
  }

  /// Non-fatal problem shown at the end of the summary
  pub fn warn(&mut self, message: impl Into<String>) {
    self.warnings.push(message.into());
  }

  pub fn warnings(&self) -> &[String] {
    &self.warnings
  }

  pub fn results(&self) -> &[CheckResult] {
    &self.results
  }

  pub fn failed(&self) -> usize {
    self.results.iter().filter(|r| r.status == Status::Nok).count()
  }

  pub fn render(&self, section: Section, dotline: usize) -> String {
    let lines = match section {
      Section::Header => &self.header,
      Section::Detail => &self.detail,
      Section::Extra => &self.extra,
    };

    lines
      .iter()
      .map(|l| l.render(dotline) + "\n")
      .collect::<String>()
  }

  /// Passed and failed check names with the representative failure message
  pub fn summary(&self) -> String {
    let total = self.results.len();
    let (passed, failed): (Vec<&CheckResult>, Vec<&CheckResult>) =
      self.results.iter().partition(|r| r.status == Status::Ok);

    let mut summary = format!("Successful tests [{}/{total}]:\n", passed.len());
    for result in &passed {
      summary.push_str(&format!(" - {}\n", result.name));
    }

    if !failed.is_empty() {
      let longest = failed.iter().map(|r| r.name.chars().count()).max().unwrap_or_default();
      summary.push_str(&format!("\nFailing tests    [{}/{total}]:\n", failed.len()));
      for result in &failed {
        summary.push_str(&format!(
          " - {} : {}\n",
          ljust(&result.name, longest, ' '),
          result.failure.as_deref().unwrap_or_default()
        ));
      }
    }

    if !self.warnings.is_empty() {
      summary.push_str("\nWarnings:\n");
      for warning in &self.warnings {
        summary.push_str(&format!(" - {warning}\n"));
      }
    }

    summary
  }

  /// Full report printed to the console
  pub fn console(&self, settings: &ReportConfig, show_extra: bool) -> String {
    let dotline = settings.dotline_length;
    let mut out = String::from("platcheck report:\n*****************\n");
    out.push_str(&self.render(Section::Header, dotline));
    out.push('\n');
    out.push_str(&self.render(Section::Detail, dotline));

    if show_extra {
      out.push_str("\nSome extra info:\n");
      out.push_str(&self.render(Section::Extra, dotline));
    }

    out
  }

  /// Write the timestamped report file and return its path
  pub fn write_file(&self, config: &Config, command_line: &str, started: &DateTime<Local>) -> Result<PathBuf> {
    let settings = &config.report;
    let path = report_path(&settings.directory, &settings.file_prefix, started);
    let contents = self.file_contents(config, command_line)?;

    fs::create_dir_all(&settings.directory)
      .with_context(|| format!("Unable to create report directory {}", settings.directory.display()))?;
    fs::write(&path, contents).with_context(|| format!("Unable to write report {}", path.display()))?;
    info!("Report written to {}", path.display());

    Ok(path)
  }

  fn file_contents(&self, config: &Config, command_line: &str) -> Result<String> {
    let width = config.report.header_length;
    let dotline = config.report.dotline_length;

    let sections = [
      ("Script was run as follows:".to_string(), format!(" -> {command_line}")),
      ("Short overview of test results:".to_string(), self.summary()),
      ("Platform info:".to_string(), self.render(Section::Header, dotline)),
      ("Detailed info of test results:".to_string(), self.render(Section::Detail, dotline)),
      ("Extra info:".to_string(), self.render(Section::Extra, dotline)),
      (format!("Settings of {}:", config.source_name()), config.to_yaml()?),
    ];

    Ok(
      sections
        .iter()
        .map(|(title, body)| format!("{}{}\n", boxed(title, width), body.trim_end()))
        .collect(),
    )
  }
}

/// Section title framed by a box of asterisks
pub fn boxed(text: &str, width: usize) -> String {
  let border = "*".repeat(width);
  format!("\n{border}\n* {}*\n{border}\n", ljust(text, width.saturating_sub(3), ' '))
}

/// `<dir>/<prefix>_<YYYY-mm-dd_HH-MM-SS>.log`
pub fn report_path(directory: &Path, prefix: &str, started: &DateTime<Local>) -> PathBuf {
  directory.join(format!("{prefix}_{}.log", started.format("%Y-%m-%d_%H-%M-%S")))
}

/// Label followed by the first item, remaining items aligned below it
pub fn overview(description: &str, items: &[String]) -> Vec<String> {
  let label = ljust(&format!("-> {description}: "), OVERVIEW_WIDTH, ' ');

  match items.split_first() {
    None => vec![format!("{label}None")],
    Some((first, rest)) => std::iter::once(format!("{label}{first}"))
      .chain(rest.iter().map(|item| format!("{}{item}", " ".repeat(OVERVIEW_WIDTH))))
      .collect(),
  }
}

/// Group membership, skipped nodes and skipped checks
pub fn extra_info(groups: &TargetGroups, checks_to_skip: &[String]) -> Vec<String> {
  let mut lines = GroupName::ALL
    .iter()
    .flat_map(|group| overview(group.description(), &groups.hosts(*group)))
    .collect::<Vec<_>>();

  lines.extend(overview("skipped nodes", groups.skipped()));
  if !checks_to_skip.is_empty() {
    lines.extend(overview("skipped checks", checks_to_skip));
  }

  lines
}

/// Tool version, platform, container runtime, Kubernetes versions and start time
pub fn platform_info<E: Executor>(executor: &E, config: &Config, started: &DateTime<Local>) -> Vec<String> {
  let label = |text: &str| ljust(text, LABEL_WIDTH, ' ');

  let platform = match config.platform {
    Platform::Gcp => format!(
      "{} - version: {}",
      config.platform.display_name(),
      anthos_version(executor, &config.kubectl)
    ),
    platform => platform.display_name().to_string(),
  };

  let (client, server) = k8s_versions(executor, &config.kubectl);

  vec![
    format!("{}{}", label("platcheck version:"), env!("CARGO_PKG_VERSION")),
    format!("{}{platform}", label("Platform:")),
    format!("{}{}", label("Container runtime:"), config.container_runtime),
    format!("{}Client Version: {client}", label("K8s version:")),
    format!("{}Server Version: {server}", label("")),
    format!("{}{}", label("Start time:"), started.format("%Y-%b-%d %H:%M:%S")),
  ]
}

fn k8s_versions<E: Executor>(executor: &E, kubectl: &str) -> (String, String) {
  let unknown = || "unknown".to_string();

  let json = match executor.execute(&Target::Local, &format!("{kubectl} version -o json 2>/dev/null"), true) {
    Outcome::Success(json) => json,
    outcome => {
      debug!("Unable to read Kubernetes versions: {outcome:?}");
      return (unknown(), unknown());
    }
  };

  match serde_json::from_str::<serde_json::Value>(&json) {
    Ok(versions) => {
      let version = |key: &str| {
        versions[key]["gitVersion"]
          .as_str()
          .map(str::to_string)
          .unwrap_or_else(unknown)
      };
      (version("clientVersion"), version("serverVersion"))
    }
    Err(e) => {
      debug!("Unable to parse Kubernetes versions: {e}");
      (unknown(), unknown())
    }
  }
}

fn anthos_version<E: Executor>(executor: &E, kubectl: &str) -> String {
  let script = format!(
    "CLUSTERNAME=`{kubectl} config view -o=jsonpath='{{.clusters[0].name}}'`; \
     FIRSTHEALTHYNODE=`{kubectl} get nodes | grep Ready | head -n1 | cut -d' ' -f1`; \
     CLUSTERNAMESPACE=`{kubectl} get node $FIRSTHEALTHYNODE --show-labels | grep -oP 'namespace=\\K.*' | cut -d',' -f1`; \
     {kubectl} get cluster $CLUSTERNAME -n $CLUSTERNAMESPACE -o yaml | awk '/^  anthosBareMetalVersion:/ {{print $2}}' | head -n1"
  );

  match executor.execute(&Target::Local, &script, true) {
    Outcome::Success(version) => version,
    _ => "Unknown -> cluster resource not readable via this KUBECONFIG (need admin cluster KUBECONFIG...)".to_string(),
  }
}
