//! Stable exit codes for forge CLI commands.

/// Command succeeded and every item or file came out clean.
pub const OK: i32 = 0;
/// Invalid config, spec, blueprint or manifest, or any other error before work started.
pub const INVALID: i32 = 1;
/// The run finished but some branches, units or builds did not.
pub const DEGRADED: i32 = 2;
/// A run-fatal error (transport outage, bad credentials) stopped the run early.
pub const ABORTED: i32 = 3;
