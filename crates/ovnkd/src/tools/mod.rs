//! Live-cluster tool families.
//!
//! Each tool has a params struct (target fields flattened in) and a pure
//! `build_*` function that validates every field and returns the command.
//! The async entry points resolve the target only after the command built,
//! so rejected input never reaches an executor.

pub mod capture;
pub mod connectivity;
pub mod firewall;
pub mod ip;
pub mod kernel;
pub mod ovs;
pub mod sockets;
pub mod stats;

use crate::config::{Config, ImageConfig};
use crate::runner::{CommandRunner, RunOptions};
use ovnk_common::{CommandSpec, DiagResult, ExecutionTarget, OutputPolicy, TargetParams, ToolOutput};
use serde::{Deserialize, Serialize};

/// Optional line budget accepted by every text tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    #[serde(default)]
    pub max_lines: Option<i64>,
}

/// What the live tools need at run time
pub struct LiveContext {
    pub runner: CommandRunner,
    pub images: ImageConfig,
    pub default_max_lines: usize,
}

impl LiveContext {
    pub fn new(runner: CommandRunner, config: &Config) -> Self {
        Self {
            runner,
            images: config.images.clone(),
            default_max_lines: config.output.default_max_lines,
        }
    }

    pub fn policy(&self, max_lines: Option<i64>) -> OutputPolicy {
        OutputPolicy::with_default(max_lines, self.default_max_lines)
    }

    /// Run a built command and shape stdout as text output
    pub async fn run_text(
        &self,
        command: &CommandSpec,
        target: &ExecutionTarget,
        options: RunOptions,
        max_lines: Option<i64>,
    ) -> DiagResult<ToolOutput> {
        let stdout = self.runner.run(command, target, options).await?;
        let processed = self.policy(max_lines).apply(&stdout);
        Ok(ToolOutput::output(processed.text, processed.truncated))
    }

    /// Resolve the caller's target and run with default options
    pub async fn run_on(
        &self,
        command: CommandSpec,
        target: &TargetParams,
        output: &OutputParams,
    ) -> DiagResult<ToolOutput> {
        let target = target.resolve(None)?;
        self.run_text(&command, &target, RunOptions::default(), output.max_lines)
            .await
    }
}

/// Integer parameter where zero and absent both mean "not set"
pub(crate) fn int(value: Option<i64>) -> i64 {
    value.unwrap_or(0)
}
