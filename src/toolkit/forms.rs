//! Probe 1: submit the page's forms and look where they land

use super::{FetchedPage, Toolkit};
use crate::extract::{absolutize, is_qualifying};
use crate::fetch::HttpRequest;
use crate::schema::Hit;
use reqwest::Method;
use scraper::{Html, Selector};
use std::sync::LazyLock;

/// Forms tried per page.
const MAX_FORMS: usize = 5;

static FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());
static FIELDS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name], textarea[name]").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href][class]").unwrap());

/// A form reduced to what is needed to submit it. Built synchronously so no
/// parsed document is held across an await.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPlan {
    pub method: Method,
    pub action: String,
    pub fields: Vec<(String, String)>,
}

pub fn plan_forms(page: &FetchedPage) -> Vec<FormPlan> {
    let doc = Html::parse_document(&page.html);
    doc.select(&FORM)
        .take(MAX_FORMS)
        .filter_map(|form| {
            let attrs = form.value();
            let action = match attrs.attr("action").map(str::trim) {
                Some(a) if !a.is_empty() => absolutize(&page.final_url, a)?,
                _ => page.final_url.to_string(),
            };
            let method = match attrs.attr("method") {
                Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
                _ => Method::GET,
            };

            let mut fields = Vec::new();
            for input in form.select(&FIELDS) {
                let el = input.value();
                let Some(name) = el.attr("name") else { continue };
                let value = el.attr("value").unwrap_or("");
                let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
                let checked = el.attr("checked").is_some();
                match kind.as_str() {
                    "submit" | "button" | "reset" | "image" => {}
                    "checkbox" if checked => {
                        let v = if value.is_empty() { "on" } else { value };
                        fields.push((name.to_string(), v.to_string()));
                    }
                    "radio" if checked => fields.push((name.to_string(), value.to_string())),
                    "checkbox" | "radio" => {}
                    _ => fields.push((name.to_string(), value.to_string())),
                }
            }

            Some(FormPlan {
                method,
                action,
                fields,
            })
        })
        .collect()
}

fn download_anchor(html: &str, base: &url::Url) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR)
        .filter(|a| {
            a.value()
                .attr("class")
                .is_some_and(|c| c.to_lowercase().contains("download"))
        })
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize(base, href))
        .find(|u| is_qualifying(u))
}

/// Submit each planned form in order. A failed submission moves on to the
/// next form.
pub async fn submit_forms(toolkit: &Toolkit<'_>, page: &FetchedPage, plans: Vec<FormPlan>) -> Option<Hit> {
    let page_url = page.final_url.as_str();
    for plan in plans {
        let request = if plan.method == Method::POST {
            HttpRequest::post(plan.action.clone(), plan.fields)
        } else {
            let mut target = match url::Url::parse(&plan.action) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if !plan.fields.is_empty() {
                target.query_pairs_mut().extend_pairs(plan.fields.iter());
            }
            HttpRequest::get(target.to_string())
        }
        .browser_headers(toolkit.user_agent, page_url);

        let timeout = match toolkit.deadline.bound(toolkit.fetch_timeout) {
            Ok(t) => t,
            Err(_) => return None,
        };
        let response = match toolkit.fetcher.send(request, timeout).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(action = %plan.action, "form submission failed: {}", e);
                continue;
            }
        };

        if response.url != page_url && response.url != page.source_url.as_str() && is_qualifying(&response.url) {
            return Some(Hit::new(response.url, "html_form"));
        }
        if let Some(link) = download_anchor(&response.body, &page.final_url) {
            return Some(Hit::new(link, "html_form"));
        }
    }
    None
}
