//! Session configuration resolved from an argument string

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::args::{tokenize, Token};
use crate::error::{TunwarpError, TunwarpResult};
use crate::validation;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8086";
pub const DEFAULT_ENDPOINT: &str = "notset";
pub const DEFAULT_LICENSE_KEY: &str = "notset";
pub const DEFAULT_RTT_THRESHOLD_MS: u32 = 1000;

/// Value type of a recognized flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Bool,
    String,
    Int,
}

/// Schema entry for a recognized flag
#[derive(Debug, Clone, Copy)]
pub struct FlagSpec {
    pub name: &'static str,
    pub kind: FlagKind,
    pub default: &'static str,
    pub help: &'static str,
}

/// Every flag the resolver accepts
pub const FLAGS: &[FlagSpec] = &[
    FlagSpec { name: "v", kind: FlagKind::Bool, default: "false", help: "verbose" },
    FlagSpec { name: "b", kind: FlagKind::String, default: DEFAULT_BIND_ADDRESS, help: "socks bind address" },
    FlagSpec { name: "e", kind: FlagKind::String, default: DEFAULT_ENDPOINT, help: "warp clean ip" },
    FlagSpec { name: "k", kind: FlagKind::String, default: DEFAULT_LICENSE_KEY, help: "license key" },
    FlagSpec { name: "country", kind: FlagKind::String, default: "", help: "psiphon country code in ISO 3166-1 alpha-2 format" },
    FlagSpec { name: "cfon", kind: FlagKind::Bool, default: "false", help: "enable psiphon over warp" },
    FlagSpec { name: "gool", kind: FlagKind::Bool, default: "false", help: "enable warp gooling" },
    FlagSpec { name: "scan", kind: FlagKind::Bool, default: "false", help: "enable warp scanner (experimental)" },
    FlagSpec { name: "rtt", kind: FlagKind::Int, default: "1000", help: "scanner rtt threshold in milliseconds" },
];

/// Look up a flag by name (without dashes)
pub fn lookup(name: &str) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|flag| flag.name == name)
}

/// Render usage text for every recognized flag
pub fn usage() -> String {
    let mut out = String::from("Usage of tunwarp:\n");
    for flag in FLAGS {
        let type_name = match flag.kind {
            FlagKind::Bool => "",
            FlagKind::String => " string",
            FlagKind::Int => " int",
        };
        let _ = writeln!(out, "  -{}{}", flag.name, type_name);

        let shows_default = match flag.kind {
            FlagKind::Bool => flag.default != "false",
            FlagKind::String => !flag.default.is_empty(),
            FlagKind::Int => flag.default != "0",
        };
        if !shows_default {
            let _ = writeln!(out, "    \t{}", flag.help);
        } else if flag.kind == FlagKind::String {
            let _ = writeln!(out, "    \t{} (default {:?})", flag.help, flag.default);
        } else {
            let _ = writeln!(out, "    \t{} (default {})", flag.help, flag.default);
        }
    }
    out
}

/// Resolved tunnel session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Verbose logging (`-v`)
    pub verbose: bool,
    /// Local SOCKS bind address (`-b`)
    pub bind_address: String,
    /// Tunnel endpoint override (`-e`)
    pub endpoint: String,
    /// License key (`-k`)
    pub license_key: String,
    /// Egress country hint (`-country`)
    pub country_code: String,
    /// Alternate transport fallback (`-cfon`)
    pub psiphon_enabled: bool,
    /// Connection multiplexing mode (`-gool`)
    pub gool: bool,
    /// Endpoint scanning (`-scan`)
    pub scan_enabled: bool,
    /// Scanner latency acceptance threshold (`-rtt`)
    pub rtt_threshold_ms: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            verbose: false,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            license_key: DEFAULT_LICENSE_KEY.to_string(),
            country_code: String::new(),
            psiphon_enabled: false,
            gool: false,
            scan_enabled: false,
            rtt_threshold_ms: DEFAULT_RTT_THRESHOLD_MS,
        }
    }
}

fn invalid(flag: &str, value: &str, reason: String) -> TunwarpError {
    TunwarpError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason,
    }
}

impl Configuration {
    /// Tokenize and resolve an argument string
    pub fn from_args(arg_str: &str) -> TunwarpResult<Self> {
        resolve(&tokenize(arg_str))
    }

    /// Address the forwarding engine dials to reach the SOCKS server.
    ///
    /// A wildcard bind cannot be dialed, so `0.0.0.0` becomes loopback.
    pub fn socks_server_address(&self) -> String {
        self.bind_address.replace("0.0.0.0", "127.0.0.1")
    }

    fn apply(&mut self, flag: &FlagSpec, value: Option<&str>) -> TunwarpResult<()> {
        let name = flag.name;
        match (name, value) {
            ("v" | "cfon" | "gool" | "scan", value) => {
                let enabled = match value {
                    Some(v) => validation::parse_bool(v).map_err(|reason| invalid(name, v, reason))?,
                    None => true,
                };
                match name {
                    "v" => self.verbose = enabled,
                    "cfon" => self.psiphon_enabled = enabled,
                    "gool" => self.gool = enabled,
                    _ => self.scan_enabled = enabled,
                }
            }
            (_, None) => return Err(TunwarpError::MissingValue(name.to_string())),
            ("b", Some(v)) => {
                validation::validate_bind_address(v).map_err(|reason| invalid(name, v, reason))?;
                self.bind_address = v.to_string();
            }
            ("e", Some(v)) => self.endpoint = v.to_string(),
            ("k", Some(v)) => self.license_key = v.to_string(),
            ("country", Some(v)) => {
                validation::validate_country_code(v).map_err(|reason| invalid(name, v, reason))?;
                self.country_code = v.to_string();
            }
            ("rtt", Some(v)) => {
                self.rtt_threshold_ms =
                    validation::parse_rtt_threshold(v).map_err(|reason| invalid(name, v, reason))?;
            }
            (other, _) => return Err(TunwarpError::UnknownFlag(other.to_string())),
        }
        Ok(())
    }
}

/// Resolve tokens against the flag schema, starting from defaults.
///
/// Unknown flags and unparsable values are errors; a later occurrence of a
/// flag overrides an earlier one.
pub fn resolve(tokens: &[Token]) -> TunwarpResult<Configuration> {
    let mut config = Configuration::default();
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        let name = match token.flag_name() {
            Some(name) => name,
            None => {
                return Err(TunwarpError::ConfigError(format!(
                    "Unexpected argument {:?}",
                    token.as_str()
                )))
            }
        };

        if name == "h" || name == "help" {
            return Err(TunwarpError::HelpRequested(usage()));
        }

        let flag = lookup(name).ok_or_else(|| TunwarpError::UnknownFlag(name.to_string()))?;

        // A bare bool flag means true
        let value = match iter.peek() {
            Some(Token::Value(v)) => {
                iter.next();
                Some(v.as_str())
            }
            _ => None,
        };

        config.apply(flag, value)?;
    }

    Ok(config)
}
