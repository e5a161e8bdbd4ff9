use anyhow::Result;
use clap::Args;

use crate::config;

/// Input arguments for `default-config` command
#[derive(Args, Debug, Default)]
pub struct DefaultConfigInput {}

impl DefaultConfigInput {
  pub async fn print(&self) -> Result<()> {
    print!("{}", config::embedded_default()?);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn it_prints_embedded_config() {
    assert!(DefaultConfigInput::default().print().await.is_ok());
  }
}
