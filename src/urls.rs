//! Minimal URL splitting for capture targets and object-store locations.

/// Parsed URL components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// Host without port; the bucket name for `s3://` URLs.
    pub host: String,
    /// Path including the leading `/`, without query or fragment.
    pub path: String,
}

/// Simple URL parser (avoids pulling in a full URL crate).
pub fn parse_url(url: &str) -> Result<ParsedUrl, String> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| "Missing scheme (expected e.g. https:// or s3://)".to_string())?;

    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
        return Err(format!("Unsupported scheme: {}", scheme));
    }

    // Drop query and fragment
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    // Drop userinfo
    let host_and_port = authority.rsplit('@').next().unwrap_or(authority);

    let host = if host_and_port.starts_with('[') {
        // IPv6: [::1]:8080 or [::1]
        match host_and_port.find(']') {
            Some(bracket_idx) => &host_and_port[1..bracket_idx],
            None => return Err("Invalid IPv6 address".to_string()),
        }
    } else {
        match host_and_port.rfind(':') {
            Some(idx) => &host_and_port[..idx],
            None => host_and_port,
        }
    };

    if host.is_empty() {
        return Err("Empty host".to_string());
    }

    Ok(ParsedUrl {
        host: host.to_lowercase(),
        path: path.to_string(),
    })
}

/// Suggested download name for an artifact: `<host>-<YYYY-MM-DD>.<ext>`.
///
/// Returns `None` when the capture URL has no parseable host.
pub fn download_filename(
    capture_url: &str,
    date: chrono::NaiveDate,
    extension: &str,
) -> Option<String> {
    let parsed = parse_url(capture_url).ok()?;
    Some(format!(
        "{}-{}.{}",
        parsed.host,
        date.format("%Y-%m-%d"),
        extension
    ))
}
