//! Built-in stage actions
//!
//! - `shell` - external command execution
//! - `steps` - declarative YAML steps
//! - `artifacts` - artifact archival and fingerprints

pub mod artifacts;
pub mod shell;
pub mod steps;

pub use artifacts::{archive, fingerprint, ArchiveRequest};
pub use shell::{CommandOutput, CommandRunner, CommandSpec, ShellCommandRunner};
pub use steps::{CompiledStep, StepsAction};
