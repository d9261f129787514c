//! ovnk common - shared types for the ovnk diagnostic daemon and its CLI.
//!
//! Validation, argument construction and output shaping live here so they can
//! be exercised without a cluster or an archive on disk.

pub mod command;
pub mod error;
pub mod output;
pub mod rpc;
pub mod target;
pub mod validate;

pub use command::CommandSpec;
pub use error::{DiagError, DiagResult, ToolError};
pub use output::{OutputPolicy, Processed};
pub use rpc::*;
pub use target::{ExecutionTarget, TargetKind, TargetParams};
pub use validate::AllowList;

/// Default socket path for ovnkd
pub const SOCKET_PATH: &str = "/run/ovnk/ovnkd.sock";
