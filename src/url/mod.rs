//! URL handling module for Menagerie
//!
//! This module derives detail-page URLs from record names, resolves references
//! found in markup, and maps record names onto local file names.

use crate::{UrlError, UrlResult};
use url::Url;

/// File extension given to every stored asset
pub const ASSET_EXTENSION: &str = "jpg";

/// Builds the detail-page URL for a record
///
/// The name is appended to `base` as-is, so `Lion` under
/// `https://en.wikipedia.org/wiki/` becomes `https://en.wikipedia.org/wiki/Lion`.
/// Characters that would otherwise start a query or fragment are escaped; the
/// URL parser percent-encodes the rest (spaces become `%20`).
///
/// # Examples
///
/// ```
/// use menagerie::url::detail_url;
///
/// let url = detail_url("https://en.wikipedia.org/wiki/", "Lion").unwrap();
/// assert_eq!(url.as_str(), "https://en.wikipedia.org/wiki/Lion");
/// ```
pub fn detail_url(base: &str, name: &str) -> UrlResult<Url> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UrlError::EmptyName);
    }

    let escaped = name.replace('?', "%3F").replace('#', "%23");
    let url =
        Url::parse(&format!("{}{}", base, escaped)).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UrlError::InvalidScheme(other.to_string())),
    }
}

/// Resolves a reference found in markup against the page it came from
///
/// Returns None if the reference should be ignored:
/// - empty or fragment-only references
/// - `javascript:` and `data:` URIs
/// - anything that does not resolve to http(s)
///
/// Scheme-relative references (`//host/path`) inherit the page's scheme.
pub fn resolve_reference(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:") || href.starts_with("data:") {
        return None;
    }

    match base.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}

/// Maps a record name to the file name its asset is stored under
///
/// Path separators are replaced so a name can never escape the asset
/// directory.
pub fn asset_file_name(name: &str) -> String {
    let safe: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}.{}", safe, ASSET_EXTENSION)
}
