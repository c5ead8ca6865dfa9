//! Privilege escalation bridge for cairn.
//!
//! When an elementary operation fails with a permission error, the engine
//! hands a single [`EscalationRequest`] to the [`EscalationBridge`]. The
//! bridge checks consent, renders a minimal script for the platform shell
//! (see [`build_script`]), runs it through the OS privilege prompt with a
//! timeout, and always removes the script afterwards.

mod backend;
mod bridge;
mod error;
mod processes;
mod request;
mod script;

pub use backend::{ElevationBackend, ExitClass};
pub use bridge::{DEFAULT_ELEVATION_TIMEOUT, ElevationConsent, EscalationBridge, EscalationOutcome};
pub use error::EscalationError;
pub use processes::{ProcessSet, TrackedProcess};
pub use request::EscalationRequest;
pub use script::{EXIT_TARGET_EXISTS, ShellFlavor, build_script, quote_posix, quote_powershell};
