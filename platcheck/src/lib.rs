pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod exec;
pub mod nodes;
pub mod platform;
pub mod predicate;
pub mod report;
pub mod runner;
pub mod utils;

pub use cli::{Cli, Commands};
use rust_embed::RustEmbed;

/// Embeds the contents of the `files/` directory into the binary
///
/// This struct contains the default configuration shipped with `platcheck`
#[derive(RustEmbed)]
#[folder = "files/"]
pub struct Assets;
