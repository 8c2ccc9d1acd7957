use crate::data::{ConnectorOptions, WebRequest};
use crate::error::{Error, Result};

/// Query parameter appended by [`cache_bust`].
pub const CACHE_BUST_PARAM: &str = "nocache";

/// Resolve a `~`-prefixed URL against `base`.
///
/// Absolute URLs are returned unchanged.
///
/// # Examples
///
/// ```
/// use tether_connector::core::resolve_url;
///
/// assert_eq!(
///     resolve_url("~/users/1", Some("https://api.example.com/v1/")).unwrap(),
///     "https://api.example.com/v1/users/1"
/// );
/// assert_eq!(resolve_url("https://other/x", None).unwrap(), "https://other/x");
/// ```
pub fn resolve_url(url: &str, base: Option<&str>) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::MissingUrl);
    }

    let Some(rest) = url.strip_prefix('~') else {
        return Ok(url.to_string());
    };

    let Some(base) = base.map(str::trim).filter(|base| !base.is_empty()) else {
        return Err(Error::MissingBaseUrl(url.to_string()));
    };

    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}/{rest}"))
    }
}

/// Append a cache-busting query parameter, keeping any fragment last.
///
/// # Examples
///
/// ```
/// use tether_connector::core::cache_bust;
///
/// assert_eq!(cache_bust("http://a/x", "17"), "http://a/x?nocache=17");
/// assert_eq!(cache_bust("http://a/x?q=1#top", "17"), "http://a/x?q=1&nocache=17#top");
/// ```
pub fn cache_bust(url: &str, stamp: &str) -> String {
    let (head, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };

    let separator = if head.contains('?') {
        if head.ends_with('?') || head.ends_with('&') { "" } else { "&" }
    } else {
        "?"
    };

    let mut busted = format!("{head}{separator}{CACHE_BUST_PARAM}={stamp}");
    if let Some(fragment) = fragment {
        busted.push('#');
        busted.push_str(fragment);
    }
    busted
}

/// Produce the request a connector actually schedules: URL validated and
/// resolved, cache-buster applied when the request or the options ask for it.
pub fn prepare_request(
    request: &WebRequest,
    options: &ConnectorOptions,
    stamp: &str,
) -> Result<WebRequest> {
    let mut url = resolve_url(request.url(), options.base_url.as_deref())?;
    if request.wants_cache_bust() || options.cache_bust {
        url = cache_bust(&url, stamp);
    }
    Ok(request.with_url(url))
}
