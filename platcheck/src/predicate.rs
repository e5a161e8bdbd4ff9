use std::fmt;

use anyhow::{anyhow, Result};

/// Comparison applied to the output of a check's command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
  /// Any output passes
  NonEmpty,
  /// Output is an integer greater than or equal to the bound
  AboveMin(i64),
  /// Output is an integer less than or equal to the bound
  BelowMax(i64),
  /// Output equals one of the values (case-sensitive)
  InSet(Vec<String>),
}

/// Result of evaluating a predicate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
  pub pass: bool,
  /// The value the predicate was evaluated against
  pub value: String,
}

impl Predicate {
  pub fn in_set<I, S>(values: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::InSet(values.into_iter().map(Into::into).collect())
  }

  /// Evaluate the predicate against command output
  ///
  /// Numeric predicates return an error when the output is not an integer
  pub fn evaluate(&self, output: &str) -> Result<Verdict> {
    let pass = match self {
      Self::NonEmpty => !output.is_empty(),
      Self::AboveMin(min) => parse_integer(output)? >= *min,
      Self::BelowMax(max) => parse_integer(output)? <= *max,
      Self::InSet(values) => values.iter().any(|v| v == output),
    };

    Ok(Verdict {
      pass,
      value: output.to_string(),
    })
  }
}

impl fmt::Display for Predicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NonEmpty => write!(f, "not empty"),
      Self::AboveMin(min) => write!(f, ">= {min}"),
      Self::BelowMax(max) => write!(f, "<= {max}"),
      Self::InSet(values) => write!(f, "one of {}", values.join(", ")),
    }
  }
}

fn parse_integer(output: &str) -> Result<i64> {
  output
    .trim()
    .parse::<i64>()
    .map_err(|_| anyhow!("value '{}' is not an integer", output.trim()))
}
