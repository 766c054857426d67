//! Resource-unit parsing for sandbox limits

use crate::error::{Result, SandboxError};
use regex::Regex;
use std::sync::OnceLock;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

fn memory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)(Ki|Mi|Gi)?$").expect("static regex"))
}

/// Parse a memory string such as `"256Mi"` into bytes.
///
/// A bare number is read as mebibytes. Anything that does not match
/// `<digits>[Ki|Mi|Gi]` is rejected rather than replaced with a default.
pub fn parse_memory(value: &str) -> Result<u64> {
    let invalid = || SandboxError::InvalidMemory(value.to_string());

    let captures = memory_pattern().captures(value).ok_or_else(invalid)?;
    let amount: u64 = captures[1].parse().map_err(|_| invalid())?;

    let unit = match captures.get(2).map(|m| m.as_str()) {
        Some("Ki") => KIB,
        Some("Gi") => GIB,
        _ => MIB,
    };

    amount.checked_mul(unit).ok_or_else(invalid)
}

/// Round a byte count up to whole mebibytes, never below one.
pub fn ceil_mib(bytes: u64) -> u64 {
    bytes.div_ceil(MIB).max(1)
}

/// Nominal CPU seconds per wall-clock minute for a fractional core count.
///
/// `0.5` cores becomes 30 seconds; the result is rounded up.
pub fn cpu_seconds_per_minute(cpus: f64) -> u64 {
    (cpus * 60.0).ceil() as u64
}
