//! Parameter validation.
//!
//! Every externally supplied value that can reach an argument vector passes
//! through one of these checks first. Failures are `InvalidInput` naming the
//! offending field. Allow-list tokens are trimmed before they are compared and
//! the trimmed token is the one handed back to the caller.

use crate::error::{DiagError, DiagResult};
use regex::{Regex, RegexBuilder};
use std::net::IpAddr;
use std::sync::LazyLock;

pub const ANY_INTERFACE: &str = "any";
pub const MAX_INTERFACE_LEN: usize = 15;
pub const MAX_HOSTNAME_LEN: usize = 253;
pub const MAX_FREE_TEXT_LEN: usize = 1024;
pub const MAX_OBJECT_NAME_LEN: usize = 64;
pub const MAX_URL_LEN: usize = 2048;

/// Characters never accepted in free-text expressions
pub const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '\\', '(', ')', '\0', '\n', '\r',
];

static INTERFACE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").unwrap());

static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.-]*[a-zA-Z0-9]$").unwrap());

static KUBERNETES_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9._-]*[a-z0-9])?$").unwrap());

static OBJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").unwrap());

static IMAGE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/:@-]*$").unwrap());

/// Closed set of accepted tokens for a field.
///
/// Implemented by small enums through [`allow_list!`](crate::allow_list) so
/// every call site matches exhaustively instead of looking strings up.
pub trait AllowList: Sized + Copy + 'static {
    const ALLOWED: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Parse a required token (trimmed first)
    fn parse_field(field: &str, raw: &str) -> DiagResult<Self> {
        let token = raw.trim();
        Self::ALLOWED
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == token)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALLOWED.iter().map(|v| v.as_str()).collect();
                DiagError::invalid_input(
                    field,
                    format!("'{}' is not one of: {}", token, names.join(", ")),
                )
            })
    }

    /// Parse an optional token, falling back to `default` when absent or blank
    fn parse_or(field: &str, raw: Option<&str>, default: Self) -> DiagResult<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(default),
            Some(token) => Self::parse_field(field, token),
        }
    }
}

/// Declare a closed allow-list enum with its wire tokens.
#[macro_export]
macro_rules! allow_list {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $token:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::validate::AllowList for $name {
            const ALLOWED: &'static [Self] = &[$($name::$variant),+];

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::validate::AllowList::as_str(self))
            }
        }
    };
}

allow_list! {
    /// Netfilter tables readable through iptables
    pub enum FirewallTable {
        Filter => "filter",
        Nat => "nat",
        Mangle => "mangle",
        Raw => "raw",
        Security => "security",
    }
}

/// Network interface name, or the `any` sentinel
pub fn interface_name(field: &str, value: &str) -> DiagResult<()> {
    if value == ANY_INTERFACE {
        return Ok(());
    }
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "interface name is required"));
    }
    if value.len() > MAX_INTERFACE_LEN {
        return Err(DiagError::invalid_input(
            field,
            format!("interface name too long ({} > {} chars)", value.len(), MAX_INTERFACE_LEN),
        ));
    }
    if !INTERFACE_NAME.is_match(value) {
        return Err(DiagError::invalid_input(
            field,
            format!("invalid interface name: {}", value),
        ));
    }
    Ok(())
}

/// IPv4 or IPv6 literal
pub fn ip_addr(field: &str, value: &str) -> DiagResult<IpAddr> {
    value
        .parse::<IpAddr>()
        .map_err(|_| DiagError::invalid_input(field, format!("invalid IP address: {}", value)))
}

/// IP literal or CIDR prefix such as `10.0.0.0/8`
pub fn ip_network(field: &str, value: &str) -> DiagResult<()> {
    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (value, None),
    };
    let ip = ip_addr(field, addr)?;
    if let Some(prefix) = prefix {
        let max = if ip.is_ipv4() { 32 } else { 128 };
        match prefix.parse::<u8>() {
            Ok(bits) if bits <= max => {}
            _ => {
                return Err(DiagError::invalid_input(
                    field,
                    format!("invalid prefix length in {}", value),
                ))
            }
        }
    }
    Ok(())
}

/// DNS hostname (IP literals are accepted as well)
pub fn hostname(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "hostname cannot be empty"));
    }
    if value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if value.len() > MAX_HOSTNAME_LEN {
        return Err(DiagError::invalid_input(
            field,
            format!("hostname too long ({} > {} chars)", value.len(), MAX_HOSTNAME_LEN),
        ));
    }
    if !HOSTNAME.is_match(value) {
        return Err(DiagError::invalid_input(field, format!("invalid hostname: {}", value)));
    }
    Ok(())
}

pub fn port(field: &str, value: i64) -> DiagResult<u16> {
    if !(1..=65535).contains(&value) {
        return Err(DiagError::invalid_input(
            field,
            format!("invalid port number: {} (must be 1-65535)", value),
        ));
    }
    Ok(value as u16)
}

/// Absolute URL with an http or https scheme
pub fn http_url(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "URL cannot be empty"));
    }
    if value.len() > MAX_URL_LEN {
        return Err(DiagError::invalid_input(field, "URL too long"));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DiagError::invalid_input(
            field,
            "URL contains whitespace or control characters",
        ));
    }

    let Some((scheme, rest)) = value.split_once("://") else {
        return Err(DiagError::invalid_input(
            field,
            "URL must have a scheme (http:// or https://)",
        ));
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return Err(DiagError::invalid_input(field, "URL scheme must be http or https"));
    }

    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() {
        return Err(DiagError::invalid_input(field, "URL has no host"));
    }
    Ok(())
}

/// Integer within `[min, max]`
pub fn bounded(field: &str, value: i64, min: i64, max: i64) -> DiagResult<i64> {
    if value < min || value > max {
        return Err(DiagError::invalid_input(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(value)
}

/// Optional integer where absent or zero means `default`, then range-checked
pub fn bounded_or_default(
    field: &str,
    value: Option<i64>,
    default: i64,
    min: i64,
    max: i64,
) -> DiagResult<i64> {
    let value = match value {
        None | Some(0) => default,
        Some(v) => v,
    };
    bounded(field, value, min, max)
}

/// Non-negative integer capped at `max`; zero means "not set"
pub fn at_most(field: &str, value: i64, max: i64, unit: &str) -> DiagResult<i64> {
    if value < 0 {
        return Err(DiagError::invalid_input(field, "cannot be negative"));
    }
    if value > max {
        let unit = if unit.is_empty() {
            String::new()
        } else {
            format!(" {}", unit)
        };
        return Err(DiagError::invalid_input(
            field,
            format!("cannot exceed {}{}", max, unit),
        ));
    }
    Ok(value)
}

/// Absolute path without `..` segments, restricted to `[A-Za-z0-9/_.~-]`
pub fn absolute_path(field: &str, value: &str) -> DiagResult<()> {
    if !value.starts_with('/') {
        return Err(DiagError::invalid_input(
            field,
            format!("must be an absolute path (start with /), got: {}", value),
        ));
    }
    if value.split('/').any(|segment| segment == "..") {
        return Err(DiagError::invalid_input(
            field,
            format!("contains path traversal element '..': {}", value),
        ));
    }
    if let Some((pos, c)) = value
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~')))
    {
        return Err(DiagError::invalid_input(
            field,
            format!("contains unsafe character at position {}: {:?}", pos, c),
        ));
    }
    Ok(())
}

/// Path relative to an archive root: not absolute, no `..` segments
pub fn relative_path(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "path is required"));
    }
    if value.starts_with('/') {
        return Err(DiagError::invalid_input(field, "path traversal not allowed: absolute path"));
    }
    if value.split('/').any(|segment| segment == "..") {
        return Err(DiagError::invalid_input(field, "path traversal not allowed: '..' segment"));
    }
    if value.contains('\0') {
        return Err(DiagError::invalid_input(field, "path contains NUL"));
    }
    Ok(())
}

/// Free text checked against the metacharacter denylist and length cap
pub fn free_text(field: &str, value: &str) -> DiagResult<()> {
    if value.len() > MAX_FREE_TEXT_LEN {
        return Err(DiagError::invalid_input(
            field,
            format!("too long (max {} characters)", MAX_FREE_TEXT_LEN),
        ));
    }
    if let Some(c) = value.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(DiagError::invalid_input(
            field,
            format!("contains disallowed character {:?}", c),
        ));
    }
    Ok(())
}

/// Free text that lands as a positional argument, so it must not look like a flag
pub fn expression(field: &str, value: &str) -> DiagResult<()> {
    free_text(field, value)?;
    if value.trim_start().starts_with('-') {
        return Err(DiagError::invalid_input(field, "must not start with '-'"));
    }
    Ok(())
}

/// Kubernetes object name (kind, pod, namespace, container)
pub fn kubernetes_name(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "cannot be empty"));
    }
    if value.starts_with('-') {
        return Err(DiagError::invalid_input(
            field,
            format!("name cannot start with '-': {}", value),
        ));
    }
    if value.len() > MAX_HOSTNAME_LEN || !KUBERNETES_NAME.is_match(&value.to_lowercase()) {
        return Err(DiagError::invalid_input(field, format!("invalid name format: {}", value)));
    }
    Ok(())
}

/// Firewall chain, nft table, bridge-like identifiers
pub fn object_name(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "cannot be empty"));
    }
    if value.len() > MAX_OBJECT_NAME_LEN || !OBJECT_NAME.is_match(value) {
        return Err(DiagError::invalid_input(field, format!("invalid name: {}", value)));
    }
    Ok(())
}

/// Container image reference
pub fn image_reference(field: &str, value: &str) -> DiagResult<()> {
    if value.is_empty() {
        return Err(DiagError::invalid_input(field, "image is required"));
    }
    if value.len() > 255 || !IMAGE_REFERENCE.is_match(value) {
        return Err(DiagError::invalid_input(field, format!("invalid image reference: {}", value)));
    }
    Ok(())
}

/// Compile a caller-supplied search pattern
pub fn search_pattern(field: &str, value: &str) -> DiagResult<Regex> {
    if value.len() > MAX_FREE_TEXT_LEN {
        return Err(DiagError::invalid_input(
            field,
            format!("too long (max {} characters)", MAX_FREE_TEXT_LEN),
        ));
    }
    RegexBuilder::new(value)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| DiagError::invalid_input(field, format!("invalid pattern: {}", e)))
}

/// Composite rule: at least `required` of the named fields must be set
pub fn require_at_least(required: usize, fields: &[(&str, bool)]) -> DiagResult<()> {
    let set = fields.iter().filter(|(_, is_set)| *is_set).count();
    if set < required {
        let names: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
        return Err(DiagError::invalid_input(
            names.join("|"),
            format!("requires at least {} of: {} for safety", required, names.join(", ")),
        ));
    }
    Ok(())
}

/// Treat missing and blank strings alike, trimming what remains
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_names() {
        for ok in ["eth0", "any", "br-ex", "ens3.100", "veth_1", "a", "abcdefghijklmno"] {
            assert!(interface_name("interface", ok).is_ok(), "{} should pass", ok);
        }
        for bad in ["", "abcdefghijklmnop", "eth0;ls", "eth 0", "-eth0", "eth0$", "ｅth0"] {
            assert!(interface_name("interface", bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_interface_property_over_generated_names() {
        let alphabet: Vec<char> = "abcXYZ019._-".chars().collect();
        for len in 1..=20usize {
            for offset in 0..alphabet.len() {
                let name: String = (0..len)
                    .map(|i| alphabet[(i * 7 + offset) % alphabet.len()])
                    .collect();
                let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
                let expected = len <= MAX_INTERFACE_LEN && starts_ok;
                assert_eq!(interface_name("interface", &name).is_ok(), expected, "{}", name);
            }
        }
        let with_bad_char = "eth0/1";
        assert!(interface_name("interface", with_bad_char).is_err());
    }

    #[test]
    fn test_hostnames_and_ips() {
        assert!(hostname("target", "example.com").is_ok());
        assert!(hostname("target", "10.0.0.1").is_ok());
        assert!(hostname("target", "fd00::1").is_ok());
        assert!(hostname("target", "bad_host").is_err());
        assert!(hostname("target", "-x.com").is_err());
        assert!(hostname("target", &"a".repeat(254)).is_err());
        assert!(ip_addr("address", "300.1.1.1").is_err());
        assert!(ip_network("destination", "10.0.0.0/8").is_ok());
        assert!(ip_network("destination", "10.0.0.0/33").is_err());
        assert!(ip_network("destination", "fd00::/64").is_ok());
    }

    #[test]
    fn test_ports_and_bounds() {
        assert_eq!(port("port", 443).unwrap(), 443);
        assert!(port("port", 0).is_err());
        assert!(port("port", 65536).is_err());

        assert_eq!(bounded_or_default("count", None, 4, 1, 10).unwrap(), 4);
        assert_eq!(bounded_or_default("count", Some(0), 4, 1, 10).unwrap(), 4);
        assert!(bounded_or_default("count", Some(11), 4, 1, 10).is_err());

        assert!(at_most("duration", 31, 30, "seconds").is_err());
        assert!(at_most("duration", -1, 30, "seconds").is_err());
        assert_eq!(at_most("duration", 30, 30, "seconds").unwrap(), 30);
    }

    #[test]
    fn test_urls() {
        assert!(http_url("url", "https://example.com/healthz?x=1").is_ok());
        assert!(http_url("url", "http://10.0.0.1:8080").is_ok());
        assert!(http_url("url", "ftp://example.com").is_err());
        assert!(http_url("url", "example.com").is_err());
        assert!(http_url("url", "http://").is_err());
        assert!(http_url("url", "http://a b").is_err());
    }

    #[test]
    fn test_paths() {
        assert!(absolute_path("host_path", "/").is_ok());
        assert!(absolute_path("host_path", "/sys/kernel/debug").is_ok());
        assert!(absolute_path("host_path", "relative/path").is_err());
        assert!(absolute_path("host_path", "/var/../etc").is_err());
        assert!(absolute_path("host_path", "/var/lib;rm").is_err());
        assert!(absolute_path("host_path", "/var/lib/a b").is_err());
        // a dotted name is not a traversal segment
        assert!(absolute_path("host_path", "/var/..hidden").is_ok());

        assert!(relative_path("filepath", "sos_commands/networking/ip_-d_address").is_ok());
        assert!(relative_path("filepath", "../etc/passwd").is_err());
        assert!(relative_path("filepath", "/etc/passwd").is_err());
    }

    #[test]
    fn test_free_text_denylist() {
        assert!(free_text("bpf_filter", "tcp port 80 and host 10.0.0.1").is_ok());
        for c in SHELL_METACHARACTERS {
            let value = format!("port 53 {} x", c);
            assert!(free_text("bpf_filter", &value).is_err(), "{:?} should be rejected", c);
        }
        assert!(free_text("bpf_filter", &"a".repeat(1025)).is_err());
        assert!(expression("bpf_filter", "-w /host/tmp/x").is_err());
    }

    #[test]
    fn test_allow_list_trims_then_validates() {
        assert_eq!(FirewallTable::parse_field("table", "nat ").unwrap(), FirewallTable::Nat);
        assert_eq!(FirewallTable::parse_field("table", " raw").unwrap().as_str(), "raw");
        assert!(FirewallTable::parse_field("table", "broute").is_err());
        assert!(FirewallTable::parse_field("table", "1").is_err());
        assert_eq!(
            FirewallTable::parse_or("table", None, FirewallTable::Filter).unwrap(),
            FirewallTable::Filter
        );
        assert_eq!(
            FirewallTable::parse_or("table", Some("  "), FirewallTable::Filter).unwrap(),
            FirewallTable::Filter
        );
    }

    #[test]
    fn test_kubernetes_names() {
        assert!(kubernetes_name("name", "ovnkube-node-abc12").is_ok());
        assert!(kubernetes_name("kind", "Pod").is_ok());
        assert!(kubernetes_name("name", "-n").is_err());
        assert!(kubernetes_name("name", "pod;ls").is_err());
        assert!(kubernetes_name("name", "").is_err());
    }

    #[test]
    fn test_require_at_least() {
        let err = require_at_least(
            2,
            &[("duration", true), ("packet_count", false), ("bpf_filter", false)],
        )
        .unwrap_err();
        assert!(err.is_invalid_input());
        let bounded = [("duration", true), ("packet_count", false), ("bpf_filter", true)];
        assert!(require_at_least(2, &bounded).is_ok());
    }

    #[test]
    fn test_search_pattern() {
        assert!(search_pattern("pattern", "error|fail(ed)?").is_ok());
        assert!(search_pattern("pattern", "(unclosed").is_err());
    }
}
