//! Canonicalization of tenant keys, custom domains and page paths
//!
//! Both the tenant resolver and the persistence layer go through these
//! functions so that a subdomain or path is only ever stored and compared in
//! one canonical spelling.

use std::net::IpAddr;

use crate::{Error, Result};

/// Maximum length of a single DNS label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a page path.
pub const MAX_PATH_LEN: usize = 1024;

/// Labels that never identify a tenant on their own.
const RESERVED_LABELS: &[&str] = &["www", "localhost"];

/// Check that `label` is a lower-case DNS label.
fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Lower-case a host and drop the port, IPv6 brackets and trailing dot.
pub fn canonical_host(raw: &str) -> String {
    let mut host = raw.trim().to_ascii_lowercase();

    // Bracketed IPv6 literal, with or without a port
    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            host = host[1..end].to_string();
        }
        return host;
    }

    // Only strip a port when there is exactly one colon; more means bare IPv6
    if host.matches(':').count() == 1
        && let Some((h, _port)) = host.split_once(':')
    {
        host = h.to_string();
    }

    while host.ends_with('.') {
        host.pop();
    }
    host
}

/// Normalize a subdomain supplied by an administrator (tenant creation or rename).
///
/// # Errors
/// - `Error::InvalidSubdomain` if the result is not a usable DNS label
pub fn normalize_subdomain(subdomain: &str) -> Result<String> {
    let label = subdomain.trim().to_ascii_lowercase();
    if !is_dns_label(&label) || RESERVED_LABELS.contains(&label.as_str()) {
        return Err(Error::InvalidSubdomain(subdomain.to_string()));
    }
    Ok(label)
}

/// Normalize an inbound request key (a `Host` value or an explicit tenant header)
/// into a tenant subdomain.
///
/// The longest matching entry of `suffixes` is stripped from the host, and a
/// bare label (the usual header form) is used as is. A multi-label host under
/// none of the suffixes is only usable when no suffixes are configured, in
/// which case its leftmost label is taken. A leading `www` label is ignored.
///
/// # Errors
/// - `Error::AmbiguousKey` when no usable subdomain remains, e.g. IP access,
///   `localhost`, a bare configured suffix, or a foreign host while suffixes
///   are configured
pub fn normalize_request_key(key: &str, suffixes: &[String]) -> Result<String> {
    let host = canonical_host(key);
    let ambiguous = || Error::AmbiguousKey(key.to_string());

    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return Err(ambiguous());
    }

    let mut best: Option<&str> = None;
    let mut has_suffixes = false;
    for suffix in suffixes {
        let suffix = suffix.trim().trim_start_matches('.').trim_end_matches('.');
        if suffix.is_empty() {
            continue;
        }
        has_suffixes = true;
        let suffix = suffix.to_ascii_lowercase();
        if host == suffix {
            return Err(ambiguous());
        }
        let Some(prefix) = host.strip_suffix(&suffix) else {
            continue;
        };
        let Some(prefix) = prefix.strip_suffix('.') else {
            // Bare suffix or a label that merely ends with the suffix text
            continue;
        };
        if best.is_none_or(|b| prefix.len() < b.len()) {
            best = Some(prefix);
        }
    }

    let mut labels: Vec<&str> = match best {
        Some(prefix) => prefix.split('.').collect(),
        None => host.split('.').collect(),
    };
    if labels.len() > 1 && labels[0] == "www" {
        labels.remove(0);
    }

    let candidate = match (best, labels.as_slice()) {
        // Exactly one label left in front of a known suffix
        (Some(_), [label]) => *label,
        // Nested labels in front of a suffix are not a tenant convention
        (Some(_), _) => return Err(ambiguous()),
        // Foreign hosts only reach a tenant through a claimed custom domain
        (None, _) if has_suffixes && host.contains('.') => return Err(ambiguous()),
        (None, [first, ..]) => *first,
        (None, []) => return Err(ambiguous()),
    };

    if !is_dns_label(candidate) || RESERVED_LABELS.contains(&candidate) {
        return Err(ambiguous());
    }
    Ok(candidate.to_string())
}

/// Normalize a custom domain (lower-case, no trailing dot, valid labels).
///
/// # Errors
/// - `Error::InvalidSubdomain` if any label is malformed or the domain has a
///   single label
pub fn normalize_domain(domain: &str) -> Result<String> {
    let host = canonical_host(domain);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| is_dns_label(l)) || host.parse::<IpAddr>().is_ok()
    {
        return Err(Error::InvalidSubdomain(domain.to_string()));
    }
    Ok(host)
}

/// Normalize a page path so it starts with `/`, has no repeated or trailing
/// slashes and no relative segments.
///
/// # Errors
/// - `Error::InvalidPath` for `.`/`..` segments, whitespace, control
///   characters or overlong paths
pub fn normalize_page_path(path: &str) -> Result<String> {
    let invalid = || Error::InvalidPath(path.to_string());
    let trimmed = path.trim();

    if trimmed.len() > MAX_PATH_LEN {
        return Err(invalid());
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }

    let mut normalized = String::with_capacity(trimmed.len() + 1);
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(invalid());
        }
        normalized.push('/');
        normalized.push_str(segment);
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffixes() -> Vec<String> {
        vec!["sites.example.com".to_string(), "example.com".to_string()]
    }

    #[test]
    fn test_request_key_with_suffix() {
        assert_eq!(
            normalize_request_key("ACME.sites.example.com:8080", &suffixes()).unwrap(),
            "acme"
        );
        assert_eq!(
            normalize_request_key("acme.example.com.", &suffixes()).unwrap(),
            "acme"
        );
    }

    #[test]
    fn test_request_key_prefers_longest_suffix() {
        // "sites.example.com" must win over "example.com"
        assert_eq!(
            normalize_request_key("shop.sites.example.com", &suffixes()).unwrap(),
            "shop"
        );
    }

    #[test]
    fn test_request_key_bare_label_and_www() {
        assert_eq!(normalize_request_key("  Acme ", &[]).unwrap(), "acme");
        assert_eq!(
            normalize_request_key("www.acme.example.com", &suffixes()).unwrap(),
            "acme"
        );
        assert_eq!(normalize_request_key("acme.other.org", &[]).unwrap(), "acme");
        assert_eq!(normalize_request_key("acme", &suffixes()).unwrap(), "acme");
    }

    #[test]
    fn test_request_key_foreign_host_with_suffixes() {
        for key in ["blog.globex.com", "acme.other.org:443", "www.acme"] {
            let err = normalize_request_key(key, &suffixes()).unwrap_err();
            assert!(matches!(err, Error::AmbiguousKey(_)), "key {key:?} gave {err:?}");
        }
    }

    #[test]
    fn test_request_key_ambiguous() {
        for key in [
            "",
            "127.0.0.1",
            "127.0.0.1:8080",
            "[::1]:3000",
            "::1",
            "localhost",
            "localhost:3000",
            "example.com",
            "www.example.com",
            "a.b.example.com",
            "-bad-.example.com",
            "under_score.example.com",
        ] {
            let err = normalize_request_key(key, &suffixes()).unwrap_err();
            assert!(matches!(err, Error::AmbiguousKey(_)), "key {key:?} gave {err:?}");
        }
    }

    #[test]
    fn test_normalize_subdomain() {
        assert_eq!(normalize_subdomain(" Acme-Co ").unwrap(), "acme-co");
        assert!(normalize_subdomain("www").is_err());
        assert!(normalize_subdomain("acme.co").is_err());
        assert!(normalize_subdomain(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Shop.Acme.COM.").unwrap(), "shop.acme.com");
        assert!(normalize_domain("acme").is_err());
        assert!(normalize_domain("10.0.0.1").is_err());
    }

    #[test]
    fn test_normalize_page_path() {
        assert_eq!(normalize_page_path("").unwrap(), "/");
        assert_eq!(normalize_page_path("about").unwrap(), "/about");
        assert_eq!(normalize_page_path("//blog///post/").unwrap(), "/blog/post");
        assert!(matches!(
            normalize_page_path("/a/../b"),
            Err(Error::InvalidPath(_))
        ));
        assert!(normalize_page_path("/with space").is_err());
    }
}
