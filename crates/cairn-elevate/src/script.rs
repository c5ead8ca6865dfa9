//! Script generation for elevated operations.
//!
//! [`build_script`] is a pure function from a request to the text of a
//! single-purpose script. Every interpolated value goes through the quoting
//! function of the target shell; nothing is ever spliced in raw.

use std::path::Path;

use crate::error::EscalationError;
use crate::request::EscalationRequest;

/// Exit code used by generated scripts when a target already exists.
pub const EXIT_TARGET_EXISTS: i32 = 17;

/// Shell grammar a script is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlavor {
    /// POSIX `sh`.
    Posix,
    /// Windows PowerShell.
    PowerShell,
}

impl ShellFlavor {
    /// The flavor native to the current OS.
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::PowerShell
        } else {
            Self::Posix
        }
    }

    /// File suffix for script files.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Posix => ".sh",
            Self::PowerShell => ".ps1",
        }
    }

    /// Quote a value as a single literal argument.
    pub fn quote(self, value: &str) -> Result<String, EscalationError> {
        if value.contains('\0') {
            return Err(EscalationError::NullByte { field: "value" });
        }
        Ok(match self {
            Self::Posix => quote_posix(value),
            Self::PowerShell => quote_powershell(value),
        })
    }
}

/// Single-quote for `sh`. Inside single quotes nothing is special, so the
/// only thing to handle is the quote itself: close, emit `\'`, reopen.
pub fn quote_posix(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Single-quote for PowerShell. Quotes are escaped by doubling, and
/// PowerShell also treats the typographic single quotes as delimiters.
pub fn quote_powershell(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Build the script for one request.
pub fn build_script(
    request: &EscalationRequest,
    flavor: ShellFlavor,
) -> Result<String, EscalationError> {
    request.check()?;
    let q = |path: &Path| -> Result<String, EscalationError> {
        let text = path.to_str().ok_or_else(|| EscalationError::InvalidRequest {
            reason: "path is not valid UTF-8".into(),
        })?;
        flavor.quote(text)
    };

    let body = match (flavor, request) {
        (
            ShellFlavor::Posix,
            EscalationRequest::Copy {
                source,
                destination,
            },
        ) => format!("cp -R -- {} {}", q(source)?, q(destination)?),
        (
            ShellFlavor::Posix,
            EscalationRequest::Move {
                source,
                destination,
            },
        ) => format!("mv -- {} {}", q(source)?, q(destination)?),
        (ShellFlavor::Posix, EscalationRequest::Delete { path }) => {
            format!("rm -rf -- {}", q(path)?)
        }
        (ShellFlavor::Posix, request @ EscalationRequest::Rename { source, .. }) => {
            let target = target_of(request)?;
            format!(
                "{}\nmv -- {} {}",
                posix_refuse_existing(&q(&target)?),
                q(source)?,
                q(&target)?
            )
        }
        (ShellFlavor::Posix, request @ EscalationRequest::CreateFolder { .. }) => {
            format!("mkdir -- {}", q(&target_of(request)?)?)
        }
        (ShellFlavor::Posix, request @ EscalationRequest::CreateFile { .. }) => {
            let target = q(&target_of(request)?)?;
            format!("{}\n: > {target}", posix_refuse_existing(&target))
        }
        (
            ShellFlavor::PowerShell,
            EscalationRequest::Copy {
                source,
                destination,
            },
        ) => format!(
            "Copy-Item -LiteralPath {} -Destination {} -Recurse -Force",
            q(source)?,
            q(destination)?
        ),
        (
            ShellFlavor::PowerShell,
            EscalationRequest::Move {
                source,
                destination,
            },
        ) => format!(
            "Move-Item -LiteralPath {} -Destination {} -Force",
            q(source)?,
            q(destination)?
        ),
        (ShellFlavor::PowerShell, EscalationRequest::Delete { path }) => {
            format!("Remove-Item -LiteralPath {} -Recurse -Force", q(path)?)
        }
        (ShellFlavor::PowerShell, EscalationRequest::Rename { source, new_name }) => format!(
            "Rename-Item -LiteralPath {} -NewName {}",
            q(source)?,
            flavor.quote(new_name)?
        ),
        (ShellFlavor::PowerShell, request @ EscalationRequest::CreateFolder { .. }) => format!(
            "New-Item -ItemType Directory -Path {} | Out-Null",
            q(&target_of(request)?)?
        ),
        (ShellFlavor::PowerShell, request @ EscalationRequest::CreateFile { .. }) => format!(
            "New-Item -ItemType File -Path {} | Out-Null",
            q(&target_of(request)?)?
        ),
    };

    Ok(match flavor {
        ShellFlavor::Posix => format!("#!/bin/sh\nset -eu\n{body}\n"),
        ShellFlavor::PowerShell => format!("$ErrorActionPreference = 'Stop'\n{body}\n"),
    })
}

fn target_of(request: &EscalationRequest) -> Result<std::path::PathBuf, EscalationError> {
    request
        .target_path()
        .ok_or_else(|| EscalationError::InvalidRequest {
            reason: "path has no parent directory".into(),
        })
}

fn posix_refuse_existing(quoted_target: &str) -> String {
    format!(
        "if [ -e {quoted_target} ] || [ -L {quoted_target} ]; then echo 'target already exists' >&2; exit {EXIT_TARGET_EXISTS}; fi"
    )
}
