//! HTTP page source driven by CSS selectors from configuration.
//!
//! Pages are fetched with `reqwest` and parsed with `scraper`. "Load more"
//! follows the link matched by `more_selector`; each fetched page is kept so
//! that [`PageSource::find_items`] returns the cumulative list, the same
//! shape a browser shows after clicking a load-more button.
//!
//! Parsed documents are not `Send`, so only raw HTML crosses await points.
//! Items carry their own outer HTML and are re-parsed on extraction.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use review_harvest_core::error::{ExtractionFailure, HarvestError};
use review_harvest_core::models::normalize_text;
use review_harvest_core::page::{PageSource, MULTI_VALUE_SEPARATOR};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::config::{CollectorConfig, FieldConfig, SourceConfig};

/// A field extractor with its selector parsed.
#[derive(Debug, Clone)]
pub struct CompiledField {
    selector: Option<Selector>,
    attr: Option<String>,
    all: bool,
    url: bool,
}

/// A [`SourceConfig`] with every selector parsed.
#[derive(Debug, Clone)]
pub struct CompiledSource {
    item: Selector,
    more: Option<Selector>,
    url_suffix: Option<String>,
    fields: HashMap<String, CompiledField>,
}

fn parse_selector(source: &str, key: &str, css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| {
        HarvestError::configuration(format!(
            "sources.{}.{}: invalid selector '{}': {:?}",
            source, key, css, e
        ))
    })
}

impl CompiledSource {
    pub fn compile(name: &str, config: &SourceConfig) -> Result<Self, HarvestError> {
        let item = parse_selector(name, "item_selector", &config.item_selector)?;
        let more = config
            .more_selector
            .as_deref()
            .map(|css| parse_selector(name, "more_selector", css))
            .transpose()?;

        let mut fields = HashMap::new();
        for (field, fc) in &config.fields {
            fields.insert(field.clone(), compile_field(name, field, fc)?);
        }

        Ok(Self {
            item,
            more,
            url_suffix: config.url_suffix.clone(),
            fields,
        })
    }

    pub fn url_suffix(&self) -> Option<&str> {
        self.url_suffix.as_deref()
    }
}

fn compile_field(
    source: &str,
    field: &str,
    config: &FieldConfig,
) -> Result<CompiledField, HarvestError> {
    let selector = config
        .selector
        .as_deref()
        .map(|css| parse_selector(source, &format!("fields.{}", field), css))
        .transpose()?;
    Ok(CompiledField {
        selector,
        attr: config.attr.clone(),
        all: config.all,
        url: config.url,
    })
}

/// Append `suffix` to `url` unless it already ends with it.
pub fn page_url(url: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => {
            let base = url.trim_end_matches('/');
            if base.ends_with(suffix) {
                base.to_string()
            } else {
                format!("{}{}", base, suffix)
            }
        }
        _ => url.to_string(),
    }
}

/// One item on a fetched page.
#[derive(Debug, Clone)]
pub struct PageItem {
    pub html: String,
    pub page_url: Url,
}

/// Outer HTML of every element matching `item` in `html`.
pub fn select_items(html: &str, item: &Selector) -> Vec<String> {
    let document = Html::parse_document(html);
    document.select(item).map(|el| el.html()).collect()
}

/// Resolve the first `more` link in `html` against `base`.
pub fn next_link(html: &str, base: &Url, more: &Selector) -> Option<Url> {
    let document = Html::parse_document(html);
    let href = document.select(more).find_map(|el| el.value().attr("href"))?;
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok()
}

fn element_value(el: ElementRef<'_>, field: &CompiledField, base: &Url) -> Option<String> {
    let raw = match &field.attr {
        Some(attr) => el.value().attr(attr).map(|v| v.to_string()),
        None => Some(el.text().collect::<Vec<_>>().join(" ")),
    }?;
    let value = normalize_text(&raw);
    if value.is_empty() {
        return None;
    }
    if field.url {
        return base.join(&value).ok().map(|u| u.to_string());
    }
    Some(value)
}

/// Evaluate one field extractor against an item's HTML.
pub fn extract_from_item(
    item: &PageItem,
    name: &str,
    field: &CompiledField,
) -> Result<String, ExtractionFailure> {
    let fragment = Html::parse_fragment(&item.html);
    let root = fragment
        .root_element()
        .children()
        .find_map(ElementRef::wrap)
        .ok_or_else(|| ExtractionFailure::new(name, "item has no element"))?;

    let candidates: Vec<ElementRef<'_>> = match &field.selector {
        Some(selector) => root.select(selector).collect(),
        None => vec![root],
    };

    let mut values: Vec<String> = Vec::new();
    for el in candidates {
        if let Some(value) = element_value(el, field, &item.page_url) {
            if !field.all {
                return Ok(value);
            }
            values.push(value);
        }
    }

    if values.is_empty() {
        return Err(ExtractionFailure::missing(name));
    }
    Ok(values.join(&MULTI_VALUE_SEPARATOR.to_string()))
}

/// [`PageSource`] over plain HTTP.
pub struct HttpPageSource {
    client: reqwest::Client,
    source: CompiledSource,
    pages: Vec<(Url, String)>,
    next: Option<Url>,
}

impl HttpPageSource {
    pub fn new(source: CompiledSource, collector: &CollectorConfig) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .user_agent(collector.user_agent.clone())
            .timeout(Duration::from_secs(collector.request_timeout_secs))
            .build()
            .map_err(|e| HarvestError::configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            source,
            pages: Vec::new(),
            next: None,
        })
    }

    pub fn from_config(
        name: &str,
        config: &SourceConfig,
        collector: &CollectorConfig,
    ) -> Result<Self, HarvestError> {
        Self::new(CompiledSource::compile(name, config)?, collector)
    }

    pub fn url_suffix(&self) -> Option<&str> {
        self.source.url_suffix()
    }

    async fn fetch(&self, url: &Url) -> Result<String, HarvestError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HarvestError::navigation(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::navigation(url.as_str(), format!("HTTP {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| HarvestError::navigation(url.as_str(), e))
    }

    fn push_page(&mut self, url: Url, html: String) {
        let next = self.source.more.as_ref().and_then(|more| next_link(&html, &url, more));
        self.next = match next {
            Some(next) if next == url || self.pages.iter().any(|(seen, _)| *seen == next) => {
                debug!(url = %next, "load-more link points to a fetched page");
                None
            }
            other => other,
        };
        self.pages.push((url, html));
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    type Item = PageItem;

    async fn navigate(&mut self, url: &str) -> Result<(), HarvestError> {
        let parsed = Url::parse(url).map_err(|e| HarvestError::navigation(url, e))?;
        self.pages.clear();
        self.next = None;
        let html = self.fetch(&parsed).await?;
        self.push_page(parsed, html);
        Ok(())
    }

    async fn find_items(&mut self) -> Result<Vec<PageItem>, HarvestError> {
        let mut items = Vec::new();
        for (url, html) in &self.pages {
            items.extend(select_items(html, &self.source.item).into_iter().map(|html| PageItem {
                html,
                page_url: url.clone(),
            }));
        }
        Ok(items)
    }

    fn extract_field(&self, item: &PageItem, field: &str) -> Result<String, ExtractionFailure> {
        let compiled = self
            .source
            .fields
            .get(field)
            .ok_or_else(|| ExtractionFailure::new(field, "no extractor configured"))?;
        extract_from_item(item, field, compiled)
    }

    async fn trigger_more(&mut self) -> Result<bool, HarvestError> {
        let Some(next) = self.next.take() else {
            return Ok(false);
        };
        debug!(url = %next, "loading more");
        let html = self.fetch(&next).await?;
        self.push_page(next, html);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use std::collections::BTreeMap;

    const REVIEW_PAGE: &str = r#"
<html><body>
  <ul class="reviews">
    <li class="review-item" data-review="r-101">
      <a class="user" href="/u/lan">  Lan
        Nguyen </a>
      <span class="score">8,5</span>
      <span class="time">05/03/2024 14:30</span>
      <div class="text">Phở ngon, nước dùng đậm đà.</div>
      <img class="photo" src="/img/a.jpg"><img class="photo" src="https://cdn.example.com/b.jpg">
    </li>
    <li class="review-item" data-review="r-100">
      <span class="score">6</span>
    </li>
  </ul>
  <a class="more" href="?page=2">Xem thêm</a>
</body></html>"#;

    fn field(selector: Option<&str>, attr: Option<&str>, all: bool, url: bool) -> FieldConfig {
        FieldConfig {
            selector: selector.map(str::to_string),
            attr: attr.map(str::to_string),
            all,
            url,
        }
    }

    fn reviews_source() -> CompiledSource {
        let mut fields = BTreeMap::new();
        fields.insert("review_id".to_string(), field(None, Some("data-review"), false, false));
        fields.insert("user_name".to_string(), field(Some("a.user"), None, false, false));
        fields.insert("rating".to_string(), field(Some(".score"), None, false, false));
        fields.insert("media_urls".to_string(), field(Some("img.photo"), Some("src"), true, true));
        let config = SourceConfig {
            item_selector: "li.review-item".to_string(),
            more_selector: Some("a.more".to_string()),
            url_suffix: Some("/binh-luan".to_string()),
            fields,
        };
        CompiledSource::compile("reviews", &config).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://www.foody.vn/ho-chi-minh/pho-a/binh-luan").unwrap()
    }

    fn items() -> Vec<PageItem> {
        let source = reviews_source();
        select_items(REVIEW_PAGE, &source.item)
            .into_iter()
            .map(|html| PageItem { html, page_url: base() })
            .collect()
    }

    #[test]
    fn page_url_appends_suffix_once() {
        assert_eq!(
            page_url("https://x.vn/quan-a", Some("/binh-luan")),
            "https://x.vn/quan-a/binh-luan"
        );
        assert_eq!(
            page_url("https://x.vn/quan-a/binh-luan/", Some("/binh-luan")),
            "https://x.vn/quan-a/binh-luan"
        );
        assert_eq!(page_url("https://x.vn/quan-a", None), "https://x.vn/quan-a");
    }

    #[test]
    fn items_are_selected_in_document_order() {
        let items = items();
        assert_eq!(items.len(), 2);
        assert!(items[0].html.contains("r-101"));
    }

    #[test]
    fn fields_read_text_attributes_and_urls() {
        let source = reviews_source();
        let items = items();
        let get = |i: usize, name: &str| extract_from_item(&items[i], name, &source.fields[name]);

        assert_eq!(get(0, "review_id").unwrap(), "r-101");
        assert_eq!(get(0, "user_name").unwrap(), "Lan Nguyen");
        assert_eq!(get(0, "rating").unwrap(), "8,5");
        assert_eq!(
            get(0, "media_urls").unwrap(),
            "https://www.foody.vn/img/a.jpg|https://cdn.example.com/b.jpg"
        );
        assert!(get(1, "user_name").is_err());
        assert!(get(1, "media_urls").is_err());
    }

    #[test]
    fn next_link_resolves_relative_href() {
        let source = reviews_source();
        let more = source.more.as_ref().unwrap();
        let next = next_link(REVIEW_PAGE, &base(), more).unwrap();
        assert_eq!(next.as_str(), "https://www.foody.vn/ho-chi-minh/pho-a/binh-luan?page=2");
        assert!(next_link("<a class='more' href='#'>x</a>", &base(), more).is_none());
    }

    #[test]
    fn invalid_field_selector_names_the_field() {
        let mut fields = BTreeMap::new();
        fields.insert("rating".to_string(), field(Some("span[["), None, false, false));
        let config = SourceConfig {
            item_selector: "li".to_string(),
            more_selector: None,
            url_suffix: None,
            fields,
        };
        let err = CompiledSource::compile("reviews", &config).unwrap_err();
        assert!(err.to_string().contains("sources.reviews.fields.rating"));
    }
}
