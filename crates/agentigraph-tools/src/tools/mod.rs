//! Builtin tools, registered under the `builtin` source.

pub mod bash;
pub mod glob;
pub mod read;

pub use bash::BashTool;
pub use glob::GlobTool;
pub use read::ReadTool;
