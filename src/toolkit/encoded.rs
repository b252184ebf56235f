//! Text probes: base64 tokens, URL parameters, filename patterns

use super::script::base64_text;
use super::ParsedPage;
use crate::extract::{file_url_regex, is_qualifying, COSMETIC, EXT_GROUPS};
use crate::schema::Hit;
use regex::Regex;
use std::sync::LazyLock;

/// Tokens decoded per page; long minified bundles would otherwise dominate.
const MAX_BASE64_TOKENS: usize = 500;

const LINK_PARAMS: &[&str] = &["url", "link", "download", "file", "redirect", "target", "go", "out"];

static BASE64_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]{20,}={0,2}").unwrap());

static GROUP_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| EXT_GROUPS.iter().map(|g| file_url_regex(g)).collect());

/// Probe 6.
pub fn base64_tokens(page: &ParsedPage<'_>) -> Option<Hit> {
    BASE64_TOKEN
        .find_iter(page.raw)
        .take(MAX_BASE64_TOKENS)
        .filter_map(|m| base64_text(m.as_str()))
        .find(|decoded| is_qualifying(decoded))
        .map(|url| Hit::new(url, "base64"))
}

/// Probe 7. A redirect that already landed on a file wins over parameters.
pub fn url_params(page: &ParsedPage<'_>) -> Option<Hit> {
    if page.final_url != page.source_url && is_qualifying(page.final_url.as_str()) {
        return Some(Hit::new(page.final_url.as_str(), "url_redirect"));
    }

    let pairs: Vec<(String, String)> = page
        .final_url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    LINK_PARAMS.iter().find_map(|name| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| is_qualifying(v))
            .map(|v| Hit::new(v, "url_param"))
    })
}

/// Probe 10. Extension groups in priority order; cosmetic assets skipped.
pub fn file_patterns(page: &ParsedPage<'_>) -> Option<Hit> {
    GROUP_PATTERNS.iter().find_map(|re| {
        re.find_iter(page.raw)
            .map(|m| m.as_str())
            .filter(|u| {
                let lower = u.to_lowercase();
                !COSMETIC.iter().any(|c| lower.contains(c))
            })
            .find(|u| is_qualifying(u))
            .map(|u| Hit::new(u, "file_pattern"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::{page_for, FetchedPage};
    use base64::Engine;
    use url::Url;

    #[test]
    fn test_base64_token_in_markup() {
        let token = base64::engine::general_purpose::STANDARD
            .encode("https://cdn.example.com/dl/part1.rar");
        let page = page_for(
            "https://site.example/",
            &format!(r#"<div data-k="{}">Loading</div>"#, token),
        );
        let hit = base64_tokens(&ParsedPage::parse(&page)).unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/dl/part1.rar");
    }

    #[test]
    fn test_redirect_to_file_is_url_redirect() {
        let page = FetchedPage {
            source_url: Url::parse("https://short.example/abc").unwrap(),
            final_url: Url::parse("https://cdn.example.com/files/setup.msi").unwrap(),
            html: String::new(),
        };
        let hit = url_params(&ParsedPage::parse(&page)).unwrap();
        assert_eq!(hit.tag, "url_redirect");
    }

    #[test]
    fn test_param_priority_and_decoding() {
        let page = page_for(
            "https://short.example/out?go=https%3A%2F%2Fa.example.com%2Fone.zip&link=https%3A%2F%2Fb.example.com%2Ftwo.zip",
            "",
        );
        let hit = url_params(&ParsedPage::parse(&page)).unwrap();
        assert_eq!(hit.url, "https://b.example.com/two.zip");
        assert_eq!(hit.tag, "url_param");
    }

    #[test]
    fn test_file_patterns_skip_cosmetic() {
        let page = page_for(
            "https://site.example/",
            r#"<img src="https://cdn.example.com/thumb/cover.jpg">
               <p>https://cdn.example.com/media/cover-full.jpg</p>"#,
        );
        let hit = file_patterns(&ParsedPage::parse(&page)).unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/media/cover-full.jpg");
        assert_eq!(hit.tag, "file_pattern");
    }

    #[test]
    fn test_file_patterns_group_order() {
        let page = page_for(
            "https://site.example/",
            "https://cdn.example.com/a.zip and https://cdn.example.com/b.mkv",
        );
        let hit = file_patterns(&ParsedPage::parse(&page)).unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/b.mkv");
    }
}
