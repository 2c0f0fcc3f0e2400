//! Flag value validation
//!
//! Each check returns the reason a value was rejected; the resolver attaches
//! the flag name and value to build the error.

use std::net::{Ipv6Addr, SocketAddr};

/// Length of an ISO 3166-1 alpha-2 country code
const COUNTRY_CODE_LEN: usize = 2;

/// Validate a `host:port` bind address
///
/// Accepts IP socket addresses (`127.0.0.1:8086`, `[::1]:8086`) and host
/// names (`localhost:8086`). IPv6 hosts must be bracketed.
pub fn validate_bind_address(addr: &str) -> Result<(), String> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| "expected host:port".to_string())?;

    if host.is_empty() {
        return Err("missing host".to_string());
    }

    port.parse::<u16>()
        .map_err(|_| format!("invalid port {:?}", port))?;

    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| "unbalanced brackets in host".to_string())?;
        inner.parse::<Ipv6Addr>()
            .map_err(|_| format!("invalid IPv6 host {:?}", inner))?;
        return Ok(());
    }

    if host.contains(':') {
        return Err("IPv6 hosts must be bracketed".to_string());
    }

    // Host names: alphanumeric labels separated by dots, dashes allowed
    for c in host.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '.' && c != '_' {
            return Err(format!("invalid character '{}' in host", c));
        }
    }

    Ok(())
}

/// Validate an optional ISO 3166-1 alpha-2 country code
pub fn validate_country_code(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Ok(());
    }

    if code.len() != COUNTRY_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("expected a two-letter ISO 3166-1 alpha-2 code".to_string());
    }

    Ok(())
}

/// Parse a boolean flag value
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

/// Parse the scanner RTT threshold in milliseconds
pub fn parse_rtt_threshold(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<i64>()
        .map_err(|_| "not an integer".to_string())?;

    if parsed < 0 {
        return Err("must not be negative".to_string());
    }

    u32::try_from(parsed).map_err(|_| "out of range".to_string())
}
