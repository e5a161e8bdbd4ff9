pub mod config;
pub mod list;
pub mod nodes;
pub mod run;
