//! DOM probes: hidden content, meta refresh, embeds, buttons, data attributes

use super::ParsedPage;
use crate::extract::{find_common_file_url, is_qualifying};
use crate::schema::Hit;
use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Selector};
use std::sync::LazyLock;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static ALL: LazyLock<Selector> = LazyLock::new(|| selector("*"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static META: LazyLock<Selector> = LazyLock::new(|| selector("meta[http-equiv][content]"));
static IFRAME: LazyLock<Selector> = LazyLock::new(|| selector("iframe[src]"));
static EMBED: LazyLock<Selector> = LazyLock::new(|| selector("embed[src]"));
static OBJECT: LazyLock<Selector> = LazyLock::new(|| selector("object[data]"));
static ANCHOR_LIKE: LazyLock<Selector> = LazyLock::new(|| selector("a, button"));

static HIDDEN_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)display\s*:\s*none|visibility\s*:\s*hidden").unwrap());
static REFRESH_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)url\s*=\s*['"]?([^'"\s;]+)"#).unwrap());
static FIRST_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).unwrap());

/// Markup the browser never renders: comments, `<noscript>`, `<template>`.
static UNRENDERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--(.*?)-->|<noscript[^>]*>(.*?)</noscript>|<template[^>]*>(.*?)</template>")
        .unwrap()
});

fn is_hidden(el: &Element) -> bool {
    if el.attr("style").is_some_and(|s| HIDDEN_STYLE.is_match(s)) {
        return true;
    }
    el.classes().any(|c| {
        let c = c.to_ascii_lowercase();
        c.contains("hidden") || c == "d-none"
    })
}

fn hidden_candidate(page: &ParsedPage<'_>, el: ElementRef<'_>) -> Option<String> {
    let from_links = el
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page.join(href))
        .find(|u| is_qualifying(u));
    if from_links.is_some() {
        return from_links;
    }

    el.value()
        .attrs()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            name.contains("url") || name.contains("link")
        })
        .filter_map(|(_, value)| page.join(value))
        .find(|u| is_qualifying(u))
}

/// Probe 2.
pub fn hidden_content(page: &ParsedPage<'_>) -> Option<Hit> {
    let hidden: Vec<ElementRef<'_>> = page
        .doc
        .select(&ALL)
        .filter(|el| is_hidden(el.value()))
        .collect();

    if let Some(url) = hidden.iter().find_map(|el| hidden_candidate(page, *el)) {
        return Some(Hit::new(url, "css_hidden"));
    }

    let unrendered = UNRENDERED
        .captures_iter(page.raw)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .find_map(|m| find_common_file_url(m.as_str()));
    if let Some(url) = unrendered {
        return Some(Hit::new(url, "css_hidden"));
    }

    hidden
        .iter()
        .find_map(|el| find_common_file_url(&el.html()))
        .map(|url| Hit::new(url, "css_hidden"))
}

/// Probe 4.
pub fn meta_refresh(page: &ParsedPage<'_>) -> Option<Hit> {
    page.doc
        .select(&META)
        .filter(|m| {
            m.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
        })
        .filter_map(|m| m.value().attr("content"))
        .filter_map(|content| REFRESH_URL.captures(content))
        .filter_map(|c| page.join(&c[1]))
        .find(|u| is_qualifying(u))
        .map(|url| Hit::new(url, "meta_refresh"))
}

/// Probe 5. Tag names the element kind the link came from.
pub fn embedded(page: &ParsedPage<'_>) -> Option<Hit> {
    let sources: [(&Selector, &str, &str); 3] = [
        (&*IFRAME, "src", "iframe"),
        (&*EMBED, "src", "embed"),
        (&*OBJECT, "data", "object"),
    ];
    sources.iter().find_map(|(sel, attr, tag)| {
        page.doc
            .select(sel)
            .filter_map(|el| el.value().attr(attr))
            .filter_map(|v| page.join(v))
            .find(|u| is_qualifying(u))
            .map(|url| Hit::new(url, *tag))
    })
}

fn attr_contains(el: &Element, attr: &str, needle: &str) -> bool {
    el.attr(attr)
        .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
}

fn class_download(e: &Element) -> bool {
    attr_contains(e, "class", "download")
}

fn id_download(e: &Element) -> bool {
    attr_contains(e, "id", "download")
}

fn btn_primary(e: &Element) -> bool {
    e.classes().any(|c| c == "btn-primary")
}

fn btn_success(e: &Element) -> bool {
    e.classes().any(|c| c == "btn-success")
}

fn role_button(e: &Element) -> bool {
    e.attr("role").is_some_and(|r| r.eq_ignore_ascii_case("button"))
}

fn title_download(e: &Element) -> bool {
    attr_contains(e, "title", "download")
}

type ButtonRule = (&'static str, fn(&Element) -> bool);

/// Download-control heuristics, tried in this order.
const BUTTON_RULES: &[ButtonRule] = &[
    ("a", class_download),
    ("a", id_download),
    ("button", class_download),
    ("a", btn_primary),
    ("a", btn_success),
    ("a", role_button),
    ("a", title_download),
];

fn button_candidate(page: &ParsedPage<'_>, el: &Element) -> Option<Hit> {
    if let Some(url) = el
        .attr("href")
        .and_then(|h| page.join(h))
        .filter(|u| is_qualifying(u))
    {
        return Some(Hit::new(url, "button_extraction"));
    }
    el.attr("onclick")
        .and_then(|js| FIRST_QUOTED.captures(js))
        .and_then(|c| page.join(&c[1]))
        .filter(|u| is_qualifying(u))
        .map(|url| Hit::new(url, "button_onclick"))
}

/// Probe 8.
pub fn buttons(page: &ParsedPage<'_>) -> Option<Hit> {
    let controls: Vec<ElementRef<'_>> = page.doc.select(&ANCHOR_LIKE).collect();
    BUTTON_RULES.iter().find_map(|(tag, rule)| {
        controls
            .iter()
            .map(|el| el.value())
            .filter(|el| el.name() == *tag && rule(el))
            .find_map(|el| button_candidate(page, el))
    })
}

/// Probe 9.
pub fn data_attributes(page: &ParsedPage<'_>) -> Option<Hit> {
    page.doc
        .select(&ALL)
        .flat_map(|el| el.value().attrs())
        .filter(|(name, _)| name.starts_with("data-"))
        .filter_map(|(_, value)| page.join(value))
        .find(|u| is_qualifying(u))
        .map(|url| Hit::new(url, "data_attribute"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::page_for;

    fn run(html: &str, probe: fn(&ParsedPage<'_>) -> Option<Hit>) -> Option<Hit> {
        let page = page_for("https://site.example/dl/page", html);
        let parsed = ParsedPage::parse(&page);
        probe(&parsed)
    }

    #[test]
    fn test_hidden_class_link() {
        let hit = run(
            r#"<div class="d-none"><a href="/files/report.pdf">r</a></div>"#,
            hidden_content,
        )
        .unwrap();
        assert_eq!(hit.url, "https://site.example/files/report.pdf");
    }

    #[test]
    fn test_hidden_attribute_named_url() {
        let hit = run(
            r#"<span style="visibility: hidden" data-file-url="https://cdn.example.com/get/77">x</span>"#,
            hidden_content,
        )
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/get/77");
    }

    #[test]
    fn test_hidden_comment_markup() {
        let hit = run(
            "<p>hi</p><!-- mirror: https://cdn.example.com/a/b/movie.mkv -->",
            hidden_content,
        )
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/a/b/movie.mkv");
    }

    #[test]
    fn test_visible_links_are_not_hidden_content() {
        assert!(run(
            r#"<a href="https://cdn.example.com/movie.mp4">watch</a>"#,
            hidden_content
        )
        .is_none());
    }

    #[test]
    fn test_meta_refresh_with_quotes() {
        let hit = run(
            r#"<meta http-equiv="Refresh" content="0; URL='/download/42'">"#,
            meta_refresh,
        )
        .unwrap();
        assert_eq!(hit.url, "https://site.example/download/42");
    }

    #[test]
    fn test_embedded_tags() {
        let hit = run(
            r#"<iframe src="https://player.example.com/v"></iframe><object data="/media/clip.mp4"></object>"#,
            embedded,
        )
        .unwrap();
        assert_eq!(hit.url, "https://site.example/media/clip.mp4");
        assert_eq!(hit.tag, "object");
    }

    #[test]
    fn test_button_rule_order_and_onclick() {
        let hit = run(
            r#"<a class="btn-primary" href="https://cdn.example.com/x.zip">A</a>
               <button class="download-btn" onclick="go('https://cdn.example.com/y.rar')">B</button>"#,
            buttons,
        )
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/y.rar");
        assert_eq!(hit.tag, "button_onclick");
    }

    #[test]
    fn test_data_attribute() {
        let hit = run(
            r#"<div data-src="https://cdn.example.com/dl/abc"></div>"#,
            data_attributes,
        )
        .unwrap();
        assert_eq!(hit.url, "https://cdn.example.com/dl/abc");
        assert_eq!(hit.tag, "data_attribute");
    }
}
