// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Hide query-string values so URLs carrying API keys can be logged.
///
/// # Examples
/// ```
/// use stockwatch::utils::url::redact;
///
/// assert_eq!(
///     redact("https://api.example.com/stock?key=secret"),
///     "https://api.example.com/stock?key=***"
/// );
/// ```
pub fn redact(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }

    let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(keys.iter().map(|k| (k.as_str(), "***")));
    url.to_string()
}

/// Join path segments onto a base URL, tolerating a trailing slash on the base.
///
/// # Examples
/// ```
/// use stockwatch::utils::url::endpoint;
///
/// assert_eq!(
///     endpoint("https://graph.example.com/v19.0/", &["1234", "photos"]),
///     "https://graph.example.com/v19.0/1234/photos"
/// );
/// ```
pub fn endpoint(base: &str, segments: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for segment in segments {
        out.push('/');
        out.push_str(segment.trim_matches('/'));
    }
    out
}

/// Check that a URL parses and uses one of the allowed schemes.
pub fn has_scheme(raw: &str, schemes: &[&str]) -> bool {
    Url::parse(raw)
        .map(|u| schemes.contains(&u.scheme()))
        .unwrap_or(false)
}
