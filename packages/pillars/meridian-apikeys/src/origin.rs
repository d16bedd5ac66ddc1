use url::Url;

/// `true` if `origin` parses with an explicit scheme (`https://...`).
pub fn has_scheme(origin: &str) -> bool {
    Url::parse(origin).is_ok()
}

/// Browser dev servers (`http://localhost:3000`, `http://127.0.0.1:...`)
/// are always allowed regardless of a publishable key's configured
/// origins, matching local-development ergonomics.
pub fn is_localhost_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

/// Matches `origin` against one glob pattern where `*` stands for exactly
/// one DNS label (`https://*.example.com` matches `https://app.example.com`
/// but not `https://a.b.example.com`).
fn matches_pattern(origin: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return origin.eq_ignore_ascii_case(pattern);
    }
    let Ok(origin_url) = Url::parse(origin) else {
        return false;
    };
    let Ok(pattern_url) = Url::parse(&pattern.replacen('*', "wildcard-placeholder", 1)) else {
        return false;
    };
    if origin_url.scheme() != pattern_url.scheme() || origin_url.port() != pattern_url.port() {
        return false;
    }
    let (Some(origin_host), Some(pattern_host)) = (origin_url.host_str(), pattern_url.host_str())
    else {
        return false;
    };
    let origin_labels: Vec<&str> = origin_host.split('.').collect();
    let pattern_labels: Vec<&str> = pattern_host.split('.').collect();
    if origin_labels.len() != pattern_labels.len() {
        return false;
    }
    origin_labels
        .iter()
        .zip(pattern_labels.iter())
        .all(|(o, p)| *p == "wildcard-placeholder" || o.eq_ignore_ascii_case(p))
}

pub fn matches_any_pattern(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_pattern(origin, p))
}

pub fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    matches_any_pattern(origin, patterns) || is_localhost_origin(origin)
}

/// Resolves the caller's IP from `X-Forwarded-For` (first hop, the
/// original client) falling back to the transport-level peer address.
pub fn resolve_client_ip(
    forwarded_for: Option<&str>,
    peer_addr: Option<std::net::IpAddr>,
) -> Option<std::net::IpAddr> {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    peer_addr
}
