use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tabled::{Table, Tabled};

use crate::{
  catalog::{Catalog, Check},
  config::Config,
  platform::Environment,
};

/// Row of the `list` output
#[derive(Debug, Tabled)]
struct CheckRow {
  #[tabled(rename = "NAME")]
  name: String,
  #[tabled(rename = "TARGETS")]
  targets: String,
  #[tabled(rename = "DESCRIPTION")]
  description: String,
}

impl From<&Check> for CheckRow {
  fn from(check: &Check) -> Self {
    Self {
      name: check.name.clone(),
      targets: check.targets.to_string(),
      description: check.description.clone(),
    }
  }
}

/// Input arguments for `list` command
#[derive(Args, Debug, Default)]
pub struct ListInput {
  /// Configuration file; defaults to ./platcheck.yaml, then the embedded default
  #[arg(long, env = "PLATCHECK_CONFIG")]
  pub config: Option<PathBuf>,
}

impl ListInput {
  pub async fn list(&self) -> Result<()> {
    let config = Config::load(self.config.as_deref())?;
    println!("{}", render(&config)?);

    Ok(())
  }
}

/// Table of the checks shown to users, sorted by name
fn render(config: &Config) -> Result<String> {
  let env = Environment {
    platform: config.platform,
    ..Environment::default()
  };
  let catalog = Catalog::from_config(config, &env)?;
  let rows = catalog.listable().into_iter().map(CheckRow::from).collect::<Vec<_>>();

  Ok(Table::new(&rows).to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn it_lists_checks() {
    let input = ListInput::default();
    assert!(input.list().await.is_ok());
  }

  #[test]
  fn it_renders_sorted_table() {
    let table = render(&Config::default()).unwrap();

    assert!(table.contains("NAME"));
    assert!(table.contains("DESCRIPTION"));
    assert!(!table.contains("selftest_ssh_reachable"));

    let amf = table.find("check_amf_cpu_pinning").unwrap();
    let istio = table.find("check_istio").unwrap();
    assert!(amf < istio);
  }
}
