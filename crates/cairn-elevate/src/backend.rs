//! Platform launchers for elevated scripts.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

use crate::script::ShellFlavor;

/// pkexec exits with 126 when the authentication dialog is dismissed.
const PKEXEC_DISMISSED: i32 = 126;
/// pkexec exits with 127 when authorization could not be obtained.
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

/// How a generated script is run with elevated privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevationBackend {
    /// macOS: `osascript` with `do shell script ... with administrator privileges`.
    AppleScript,
    /// Linux: `pkexec /bin/sh <script>` through polkit.
    Pkexec,
    /// Windows: an elevated PowerShell started with `Start-Process -Verb RunAs`.
    RunAs,
    /// Run the script with an arbitrary program. Hosts with their own
    /// privilege broker use this; it performs no elevation by itself.
    Direct {
        program: PathBuf,
        args: Vec<String>,
        shell: ShellFlavor,
        /// Exit codes that mean the user declined.
        declined_exit_codes: Vec<i32>,
    },
}

/// Terminal classification of a finished elevated process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Declined,
    Failed(String),
}

impl ElevationBackend {
    /// The GUI-mediated mechanism of the current OS.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::AppleScript
        } else if cfg!(windows) {
            Self::RunAs
        } else {
            Self::Pkexec
        }
    }

    /// Run scripts with `program args... <script>`.
    pub fn direct(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self::Direct {
            program: program.into(),
            args,
            shell: ShellFlavor::native(),
            declined_exit_codes: Vec::new(),
        }
    }

    /// Treat these exit codes of a [`Self::Direct`] launcher as a user decline.
    pub fn with_declined_exit_codes(mut self, codes: Vec<i32>) -> Self {
        if let Self::Direct {
            declined_exit_codes,
            ..
        } = &mut self
        {
            *declined_exit_codes = codes;
        }
        self
    }

    /// Shell grammar scripts must be written in.
    pub fn shell(&self) -> ShellFlavor {
        match self {
            Self::AppleScript | Self::Pkexec => ShellFlavor::Posix,
            Self::RunAs => ShellFlavor::PowerShell,
            Self::Direct { shell, .. } => *shell,
        }
    }

    /// Build the launcher command for a script file.
    pub fn command(&self, script: &Path) -> Command {
        let script_text = script.to_string_lossy();
        let mut cmd = match self {
            Self::AppleScript => {
                let inner = format!("/bin/sh {}", crate::script::quote_posix(&script_text));
                let mut cmd = Command::new("osascript");
                cmd.arg("-e").arg(format!(
                    "do shell script {} with administrator privileges",
                    applescript_string(&inner)
                ));
                cmd
            }
            Self::Pkexec => {
                let mut cmd = Command::new("pkexec");
                cmd.arg("/bin/sh").arg(script);
                cmd
            }
            Self::RunAs => {
                let inner = format!(
                    "$p = Start-Process -FilePath powershell -Verb RunAs -Wait -PassThru -WindowStyle Hidden \
                     -ArgumentList '-NoProfile','-ExecutionPolicy','Bypass','-File',{}; exit $p.ExitCode",
                    crate::script::quote_powershell(&format!("\"{script_text}\""))
                );
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-NonInteractive", "-Command"])
                    .arg(inner);
                cmd
            }
            Self::Direct { program, args, .. } => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(script);
                cmd
            }
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Classify a finished process into success, decline, or failure.
    pub fn classify(&self, status: ExitStatus, stderr: &str) -> ExitClass {
        if status.success() {
            return ExitClass::Success;
        }

        let code = status.code();
        let declined = match self {
            Self::AppleScript => stderr.contains("User canceled") || stderr.contains("(-128)"),
            Self::Pkexec => code == Some(PKEXEC_DISMISSED),
            Self::RunAs => {
                stderr.contains("canceled by the user") || stderr.contains("cancelled by the user")
            }
            Self::Direct {
                declined_exit_codes,
                ..
            } => code.is_some_and(|c| declined_exit_codes.contains(&c)),
        };
        if declined {
            return ExitClass::Declined;
        }

        if matches!(self, Self::Pkexec) && code == Some(PKEXEC_NOT_AUTHORIZED) {
            return ExitClass::Failed("Not authorized to perform this operation".to_string());
        }

        let stderr = stderr.trim();
        if stderr.is_empty() {
            match code {
                Some(c) => ExitClass::Failed(format!("Elevated command exited with status {c}")),
                None => ExitClass::Failed("Elevated command was terminated by a signal".into()),
            }
        } else {
            ExitClass::Failed(stderr.to_string())
        }
    }
}

/// Quote a string literal for AppleScript.
fn applescript_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
