use std::{
  env,
  io::{self, IsTerminal},
  path::PathBuf,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use clap::Args;
use tracing::info;

use crate::{
  catalog::{build_run_list, Catalog},
  config::Config,
  exec::{Executor, ShellExecutor, SshAuth},
  nodes::TargetGroups,
  platform::{Environment, Platform},
  report::{self, ReportBuilder, Section},
  runner::{Mode, Runner},
};

/// Input arguments for `run` command
#[derive(Args, Debug, Default)]
pub struct RunInput {
  /// Configuration file; defaults to ./platcheck.yaml, then the embedded default
  #[arg(long, env = "PLATCHECK_CONFIG")]
  pub config: Option<PathBuf>,

  /// Platform the cluster runs on; overrides the configuration
  #[arg(short, long, value_enum)]
  pub platform: Option<Platform>,

  /// Probe every node and print the detailed report
  #[arg(short, long)]
  pub report: bool,

  /// Run a single check
  #[arg(short, long)]
  pub check: Option<String>,

  /// Node to exclude from every group; may be repeated
  #[arg(short, long, conflicts_with = "only_node")]
  pub skip_node: Vec<String>,

  /// Run the checks against this node only
  #[arg(short, long)]
  pub only_node: Option<String>,

  /// SSH private key used to log in to the nodes
  #[arg(short = 'i', long)]
  pub ssh_key: Option<PathBuf>,

  /// Write the report to a timestamped file under the configured report directory
  #[arg(long)]
  pub report_file: bool,
}

impl RunInput {
  pub async fn run(&self) -> Result<()> {
    let started = Local::now();
    let config = self.config()?;
    let executor = ShellExecutor::new(SshAuth::from_config(&config.ssh));

    let report = self.execute(&executor, &config, &started)?;

    println!("{}", report.summary());
    if self.report {
      println!("{}", report.console(&config.report, self.show_extra(&config)));
    }
    if self.write_file(&config) {
      let command_line = env::args().collect::<Vec<_>>().join(" ");
      let path = report.write_file(&config, &command_line, &started)?;
      println!("Report written to {}", path.display());
    }

    match report.failed() {
      0 => Ok(()),
      failed => Err(anyhow!("{failed} of {} checks failed", report.results().len())),
    }
  }

  /// Load the configuration and apply the command line overrides
  fn config(&self) -> Result<Config> {
    let mut config = Config::load(self.config.as_deref())?;

    if let Some(platform) = self.platform {
      config.platform = platform;
    }
    if let Some(key) = &self.ssh_key {
      config.ssh.key = Some(key.clone());
    }
    config.nodes_to_skip.extend(self.skip_node.iter().cloned());

    Ok(config)
  }

  fn mode(&self, config: &Config) -> Mode {
    match self.report || self.write_file(config) {
      true => Mode::Accumulate,
      false => Mode::FailFast,
    }
  }

  fn write_file(&self, config: &Config) -> bool {
    self.report_file || config.report.create_file
  }

  fn show_extra(&self, config: &Config) -> bool {
    config.report.show_extra_info && self.only_node.is_none()
  }

  /// Discover the target groups, run the selected checks and collect the report
  fn execute<E: Executor>(&self, executor: &E, config: &Config, started: &DateTime<Local>) -> Result<ReportBuilder> {
    // Reject an unknown check before touching the cluster
    let defaults = Catalog::from_config(
      config,
      &Environment {
        platform: config.platform,
        ..Environment::default()
      },
    )?;
    build_run_list(
      &defaults,
      &config.checks_to_skip,
      self.check.as_deref(),
      config.run_checks_alphabetically,
    )?;

    let mut groups = TargetGroups::discover(executor, config)?.skip(&config.nodes_to_skip);
    if let Some(node) = &self.only_node {
      groups = groups.only(node);
    }

    let env = groups.environment(config.platform);
    let catalog = Catalog::from_config(config, &env)?;
    let run_list = build_run_list(
      &catalog,
      &config.checks_to_skip,
      self.check.as_deref(),
      config.run_checks_alphabetically,
    )?;
    info!("Running {} checks on {}", run_list.checks.len(), config.platform.display_name());

    let mode = self.mode(config);
    let mut report = ReportBuilder::new();
    for name in &run_list.unknown_skips {
      report.warn(format!("Check {name} in the skip list is not a known check"));
    }
    if mode == Mode::Accumulate {
      for line in report::platform_info(executor, config, started) {
        report.append(Section::Header, line);
      }
      if config.report.show_extra_info && groups.only_node().is_none() {
        for line in report::extra_info(&groups, &config.checks_to_skip) {
          report.append(Section::Extra, line);
        }
      }
    }

    Runner::new(executor, &groups, mode)
      .with_progress(io::stderr().is_terminal())
      .run(&run_list.checks, &mut report);

    Ok(report)
  }
}
