//! URL utilities: normalization, identity, admission filtering and link resolution.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

use crate::shard;

/// URLs longer than this are treated as generated (session ids, trap loops).
pub const MAX_URL_LENGTH: usize = 2048;

/// Non-text resources the crawler never fetches.
const DISALLOWED_EXTENSIONS: &[&str] = &[
    "css", "js", "bmp", "gif", "jpg", "jpeg", "ico", "apk", "img", "png", "tif", "tiff", "mid",
    "mp2", "mp3", "mp4", "war", "wav", "avi", "mov", "mpeg", "ram", "m4v", "mkv", "ogg", "ogv",
    "pdf", "mpg", "ps", "eps", "tex", "ppt", "pptx", "doc", "docx", "xls", "xlsx", "names",
    "data", "dat", "exe", "bz2", "tar", "msi", "bin", "7z", "psd", "dmg", "iso", "epub", "dll",
    "cnf", "tgz", "sha1", "ppsx", "thmx", "mso", "arff", "rtf", "jar", "csv", "rm", "smil",
    "wmv", "swf", "wma", "zip", "rar", "gz",
];

fn pagination_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/page/\d+(/|$)").expect("static regex"))
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[1-9][0-9]{3}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])").expect("static regex")
    })
}

pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
}

/// Canonical form used for every identity comparison.
///
/// Lower-cases scheme and host, drops credentials, port, query and fragment,
/// and strips trailing slashes from the path. Returns `None` for URLs that
/// cannot be parsed or carry no host.
pub fn normalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path().trim_end_matches('/');
    Some(format!("{}://{}{}", parsed.scheme(), host, path))
}

/// Stable identity key of a normalized URL: SHA-256 hex of its scheme-less form.
///
/// `http://` and `https://` variants of the same page share one key.
pub fn url_identity(normalized: &str) -> String {
    let without_scheme = normalized
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(normalized);
    let digest = Sha256::digest(without_scheme.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Authority-only form of a URL (`scheme://host`), the homepage of its domain.
pub fn domain_root(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(format!("{}://{}", parsed.scheme(), host))
}

pub fn robots_url(url: &str) -> Option<String> {
    domain_root(url).map(|root| format!("{}/robots.txt", root))
}

pub fn is_robots_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path() == "/robots.txt")
        .unwrap_or(false)
}

/// `.xml` resources contribute links but are not indexed as pages.
pub fn is_sitemap_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| {
            let path = u.path().to_ascii_lowercase();
            path.ends_with(".xml")
        })
        .unwrap_or(false)
}

/// Admission filter run before a URL ever touches the ledger or a queue.
pub fn is_valid(url: &str) -> bool {
    if url.len() > MAX_URL_LENGTH {
        return false;
    }

    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return false,
    };
    if shard::classify_host(&host).is_none() {
        return false;
    }

    let path = parsed.path().to_ascii_lowercase();

    if has_repeated_directory(&path) {
        return false;
    }
    if pagination_regex().is_match(&path) || date_regex().is_match(&path) {
        return false;
    }

    !has_disallowed_extension(&path)
}

/// A directory segment that appears twice in one path is a crawler-trap indicator.
fn has_repeated_directory(path: &str) -> bool {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if !path.ends_with('/') {
        segments.pop();
    }

    let mut seen = HashSet::with_capacity(segments.len());
    segments.into_iter().any(|segment| !seen.insert(segment))
}

fn has_disallowed_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((_, ext)) => DISALLOWED_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Resolve an href found on `base` into an absolute, de-fragmented, query-free URL.
///
/// Returns `None` for self-references (fragment-only hrefs, `/`), non-navigational schemes and
/// anything that does not resolve.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href == "/" {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "file:"];
    if SKIPPED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return None;
    }

    let base = Url::parse(base).ok()?;
    let mut absolute = base.join(href).ok()?;
    absolute.set_fragment(None);
    absolute.set_query(None);
    Some(absolute.to_string())
}
