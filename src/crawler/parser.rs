//! HTML parser for catalogue pages
//!
//! This module handles parsing HTML content to extract:
//! - Item links from listing pages
//! - The pager's total page count
//! - Structured records from item pages

use crate::model::{Record, RecordFields};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

const MAX_NAME_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 5000;
const MAX_CATEGORY_LEN: usize = 100;
const MAX_AVAILABILITY_LEN: usize = 100;

/// Errors that make an item page unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("required field '{0}' not found")]
    MissingField(&'static str),

    #[error("invalid source URL '{0}'")]
    InvalidSourceUrl(String),
}

/// Parses an item page into a record
///
/// # Extraction Rules
///
/// | Field | Source | Default |
/// |-------|--------|---------|
/// | name | `div.product_main h1`, then any `h1` | required |
/// | price incl. tax | table row, then `p.price_color` | required |
/// | price excl. tax | table row | price incl. tax |
/// | availability | table row | `"Unknown"` |
/// | review count | table row | 0 |
/// | category | third breadcrumb entry | `"Unknown"` |
/// | description | paragraph after `#product_description` | none |
/// | image | `div.item.active img` | none |
/// | rating | `p.star-rating` class word | none |
///
/// # Arguments
///
/// * `html` - The item page body
/// * `source_url` - The URL the page was fetched from (the record's key)
/// * `crawled_at` - When the page was fetched
pub fn parse_record(
    html: &str,
    source_url: &str,
    crawled_at: DateTime<Utc>,
) -> Result<Record, ParseError> {
    let base = Url::parse(source_url)
        .map_err(|_| ParseError::InvalidSourceUrl(source_url.to_string()))?;
    let document = Html::parse_document(html);

    let name = extract_name(&document)
        .map(|n| truncate(n, MAX_NAME_LEN))
        .ok_or(ParseError::MissingField("name"))?;

    let table = extract_product_table(&document);

    let price_incl_tax = table
        .get("Price (incl. tax)")
        .and_then(|p| parse_price(p))
        .or_else(|| select_text(&document, "p.price_color").and_then(|p| parse_price(&p)))
        .ok_or(ParseError::MissingField("price_incl_tax"))?;

    let price_excl_tax = table
        .get("Price (excl. tax)")
        .and_then(|p| parse_price(p))
        .unwrap_or(price_incl_tax);

    let availability = table
        .get("Availability")
        .filter(|a| !a.is_empty())
        .map(|a| truncate(a.clone(), MAX_AVAILABILITY_LEN))
        .unwrap_or_else(|| "Unknown".to_string());

    let review_count = table
        .get("Number of reviews")
        .and_then(|r| r.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let category = extract_category(&document)
        .map(|c| truncate(c, MAX_CATEGORY_LEN))
        .unwrap_or_else(|| "Unknown".to_string());

    let description = select_text(&document, "#product_description ~ p")
        .map(|d| truncate(d, MAX_DESCRIPTION_LEN));

    let image_url = Selector::parse("div.item.active img[src]")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| resolve_link(src, &base));

    let fields = RecordFields {
        source_url: source_url.to_string(),
        name,
        description,
        category,
        price_excl_tax,
        price_incl_tax,
        availability,
        review_count,
        image_url,
        rating: extract_rating(&document),
    };

    Ok(Record::new(fields, crawled_at, Some(html.to_string())))
}

/// Extracts item page links from a listing page, in document order
///
/// Links are resolved against `page_url` and stripped of fragments.
pub fn extract_item_links(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(selector) = Selector::parse("article.product_pod h3 a[href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(mut url) = resolve_url(href, page_url) {
                    url.set_fragment(None);
                    links.push(url);
                }
            }
        }
    }

    links
}

/// Reads the total page count from a pager reading "Page 1 of N"
///
/// Returns `None` when the page carries no pager.
pub fn extract_page_count(html: &str) -> Option<u32> {
    let document = Html::parse_document(html);
    let text = select_text(&document, "ul.pager li.current")?;
    text.rsplit(' ').next()?.parse().ok()
}

fn extract_name(document: &Html) -> Option<String> {
    select_text(document, "div.product_main h1").or_else(|| select_text(document, "h1"))
}

fn extract_category(document: &Html) -> Option<String> {
    let items = Selector::parse("ul.breadcrumb li").ok()?;
    let link = Selector::parse("a").ok()?;

    let crumb = document.select(&items).nth(2)?;
    crumb
        .select(&link)
        .next()
        .map(collapsed_text)
        .filter(|s| !s.is_empty())
}

/// Maps `<th>` labels to `<td>` values of the product information table
fn extract_product_table(document: &Html) -> HashMap<String, String> {
    let mut table = HashMap::new();

    let (Ok(rows), Ok(th), Ok(td)) = (
        Selector::parse("table.table-striped tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return table;
    };

    for row in document.select(&rows) {
        if let (Some(label), Some(value)) = (row.select(&th).next(), row.select(&td).next()) {
            table.insert(collapsed_text(label), collapsed_text(value));
        }
    }

    table
}

fn extract_rating(document: &Html) -> Option<u8> {
    let selector = Selector::parse("p.star-rating").ok()?;
    let element = document.select(&selector).next()?;

    element.value().classes().find_map(|class| match class {
        "One" => Some(1),
        "Two" => Some(2),
        "Three" => Some(3),
        "Four" => Some(4),
        "Five" => Some(5),
        _ => None,
    })
}

/// Text of the first element matching `selector`, whitespace collapsed
fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(collapsed_text)
        .filter(|s| !s.is_empty())
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(s: String, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Keeps only digits and the decimal point, so "£51.77" becomes 51.77
fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

fn resolve_url(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("data:")
    {
        return None;
    }

    let url = base_url.join(href).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    resolve_url(href, base_url).map(String::from)
}
