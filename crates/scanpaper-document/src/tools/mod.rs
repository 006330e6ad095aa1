// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External command-line tools. Each tool is run to completion as an opaque
// subprocess; its stdout and stderr are captured for diagnostics.

pub mod tesseract;
pub mod unpaper;
pub mod user_defined;

use std::ffi::OsStr;
use std::process::{Command, ExitStatus};

use scanpaper_core::error::{Result, ScanpaperError};
use tracing::{debug, instrument};

pub use tesseract::Tesseract;
pub use unpaper::{Direction, Unpaper, UnpaperOptions, UnpaperOutput};
pub use user_defined::{UserDefinedOutput, run_user_defined};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Turn a non-zero exit into an [`ScanpaperError::ExternalTool`] carrying
    /// the tool's stderr.
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ScanpaperError::external_tool(
                format!("{program} failed ({})", self.status),
                self.stderr,
            ))
        }
    }
}

/// Run `program` with `args` and wait for it.
///
/// A program that cannot be found is a configuration problem, not a tool
/// failure.
#[instrument(skip(args))]
pub fn run<I, S>(program: &str, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program).args(args).output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ScanpaperError::Configuration(format!("{program} is not installed"))
        } else {
            ScanpaperError::external_tool(format!("failed to run {program}: {err}"), "")
        }
    })?;

    let result = ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(
        status = %result.status,
        stdout_len = result.stdout.len(),
        stderr_len = result.stderr.len(),
        "Tool finished"
    );
    Ok(result)
}

/// Run a command line through `sh -c`.
pub fn run_shell(command: &str) -> Result<ToolOutput> {
    run("sh", ["-c", command])
}
