//! URL extraction and the "qualifying direct link" predicate

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// Extensions grouped the way the filename-pattern probe tries them.
pub const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "m4v"];
pub const AUDIO_EXTS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"];
pub const ARCHIVE_EXTS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"];
pub const DOCUMENT_EXTS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];
pub const EXECUTABLE_EXTS: &[&str] = &["exe", "msi", "apk", "dmg", "deb", "rpm"];
pub const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];
pub const DISK_IMAGE_EXTS: &[&str] = &["iso", "img", "bin"];

pub const EXT_GROUPS: &[&[&str]] = &[
    VIDEO_EXTS,
    AUDIO_EXTS,
    ARCHIVE_EXTS,
    DOCUMENT_EXTS,
    EXECUTABLE_EXTS,
    IMAGE_EXTS,
    DISK_IMAGE_EXTS,
];

/// Short list used by the quick raw-markup scans (hidden content, page source).
pub const COMMON_EXTS: &[&str] = &[
    "mp4", "mkv", "avi", "zip", "rar", "pdf", "doc", "docx", "exe", "apk",
];

const EXCLUDED: &[&str] = &[
    "javascript:",
    "mailto:",
    "#",
    "void(0)",
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "login",
    "signin",
    "register",
    "signup",
    "icon",
    "logo",
    "banner",
];

/// Cosmetic assets that should never be mistaken for the payload.
pub const COSMETIC: &[&str] = &["icon", "logo", "thumb", "preview"];

const PATH_MARKERS: &[&str] = &["/download/", "/get/", "/file/", "/direct/", "/dl/"];
const QUERY_MARKERS: &[&str] = &["download=", "file=", "url=", "export=download"];

static AD_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[/._?=&-])(?:ads?|adserver|advert[a-z]*|doubleclick)(?:[/._?=&-]|$)")
        .unwrap()
});

static ANY_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s\)>\]"'`<]+"#).unwrap());

/// Build `https?://…\.(ext1|ext2)` with an optional query tail.
pub fn file_url_regex(exts: &[&str]) -> Regex {
    let alt = exts.join("|");
    Regex::new(&format!(
        r#"(?i)https?://[^\s<>"'()\\]+\.(?:{})\b(?:\?[^\s<>"'\\]*)?"#,
        alt
    ))
    .unwrap()
}

static COMMON_FILE_URL: LazyLock<Regex> = LazyLock::new(|| file_url_regex(COMMON_EXTS));

static ALL_DOWNLOAD_EXTS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| EXT_GROUPS.iter().flat_map(|g| g.iter().copied()).collect());

/// Extract unique URLs from text content
pub fn extract_urls(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for mat in ANY_URL.find_iter(content) {
        let url = mat.as_str();
        // Clean trailing punctuation
        let url = url.trim_end_matches(|c| matches!(c, ',' | '.' | ')' | ']' | ';' | ':'));

        if seen.insert(url.to_string()) {
            urls.push(url.to_string());
        }
    }

    urls
}

/// First URL in `text` ending in one of the common download extensions.
pub fn find_common_file_url(text: &str) -> Option<String> {
    COMMON_FILE_URL
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .find(|u| is_qualifying(u))
}

/// Whether `candidate` looks like a direct, fetchable download link.
///
/// Absolute http(s), no excluded or ad tokens, and either a download
/// extension on the last path segment or a download-ish path/query marker.
pub fn is_qualifying(candidate: &str) -> bool {
    let candidate = candidate.trim();
    let lower = candidate.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    if EXCLUDED.iter().any(|p| lower.contains(p)) {
        return false;
    }
    let Ok(parsed) = Url::parse(candidate) else {
        return false;
    };
    if parsed.host_str().is_none() {
        return false;
    }
    if AD_TOKEN.is_match(&lower) {
        return false;
    }

    let path = parsed.path().to_lowercase();
    if has_download_extension(&path) {
        return true;
    }
    if PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return true;
    }
    let query = parsed.query().unwrap_or("").to_lowercase();
    QUERY_MARKERS.iter().any(|m| query.contains(m))
}

fn has_download_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ALL_DOWNLOAD_EXTS.contains(ext),
        _ => false,
    }
}

/// Resolve `href` against `base`, returning an absolute URL string.
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Host without a leading `www.`, lowercased.
pub fn normalized_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_urls() {
        let content = r#"
            Check out https://example.com and
            [link](https://foo.bar/path?q=1) for more.
            Also http://old.site.org.
        "#;

        let urls = extract_urls(content);
        assert_eq!(urls.len(), 3);
        assert!(urls.contains(&"https://example.com".to_string()));
        assert!(urls.contains(&"https://foo.bar/path?q=1".to_string()));
        assert!(urls.contains(&"http://old.site.org".to_string()));
    }

    #[test]
    fn test_extract_urls_dedup() {
        let urls = extract_urls("https://dup.com https://dup.com https://dup.com");
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn test_qualifying_extensions_and_markers() {
        assert!(is_qualifying("https://cdn.example.com/movie.mp4"));
        assert!(is_qualifying("https://cdn.example.com/a/b/Setup.EXE?sig=1"));
        assert!(is_qualifying("https://host.example.com/file/abc123"));
        assert!(is_qualifying("https://host.example.com/get?file=77"));
        assert!(is_qualifying(
            "https://drive.google.com/uc?id=abc&export=download"
        ));
    }

    #[test]
    fn test_qualifying_rejections() {
        assert!(!is_qualifying("/relative/movie.mp4"));
        assert!(!is_qualifying("ftp://host/movie.mp4"));
        assert!(!is_qualifying("javascript:void(0)"));
        assert!(!is_qualifying("https://facebook.com/share/file.zip"));
        assert!(!is_qualifying("https://example.com/login/file.zip"));
        assert!(!is_qualifying("https://example.com/img/logo.png"));
        assert!(!is_qualifying("https://ads.example.com/file.zip"));
        assert!(!is_qualifying("https://example.com/page.html"));
        // "docs." host must not pass as a .doc extension
        assert!(!is_qualifying("https://www.docs.example.com/readme"));
    }

    #[test]
    fn test_download_word_is_not_an_ad_token() {
        assert!(is_qualifying("https://mirror.example.com/download/pack.rar"));
        assert!(is_qualifying("https://uploads.example.com/x.zip"));
    }

    #[test]
    fn test_file_url_regex_keeps_query() {
        let re = file_url_regex(VIDEO_EXTS);
        let m = re
            .find(r#"<a href="https://v.example.com/clip.mp4?token=9">x</a>"#)
            .unwrap();
        assert_eq!(m.as_str(), "https://v.example.com/clip.mp4?token=9");
    }

    #[test]
    fn test_absolutize_and_host() {
        let base = Url::parse("https://www.site.example/page/").unwrap();
        assert_eq!(
            absolutize(&base, "../dl/a.zip").as_deref(),
            Some("https://www.site.example/dl/a.zip")
        );
        assert_eq!(
            normalized_host("https://WWW.Site.Example/x").as_deref(),
            Some("site.example")
        );
        assert_eq!(normalized_host("not a url"), None);
    }
}
