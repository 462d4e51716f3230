//! Turns the raw markup of the listings page into `Listing` records.
//!
//! Each offering lives in a `<div id="apartment-<id>">` container. The summary
//! line (`2,0 Zimmer, 45,50 m², 400,00 € Kaltmiete | Street 1, 10115 Berlin`)
//! sits in the container's title button; the Livewire `wire:snapshot`
//! attribute carries the deep link, additional costs, image and WBS details.
//! A single broken container is rejected on its own and never takes the rest
//! of the page down with it.
use crate::model::Listing;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

const CONTAINER_ID_PREFIX: &str = "apartment-";
const TITLE_MAX_CHARS: usize = 200;
const PROVIDER_HOSTS: [&str; 6] = ["degewo", "gesobau", "gewobag", "howoge", "stadtundland", "wbm"];

static CONTAINER_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"div[id^="apartment-"]"#));
static TITLE_BUTTON_SEL: Lazy<Selector> = Lazy::new(|| sel("button.list__item__title"));
static ANY_BUTTON_SEL: Lazy<Selector> = Lazy::new(|| sel("button"));
static DETAIL_DT_SEL: Lazy<Selector> = Lazy::new(|| sel("dl dt"));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static CONSENT_SEL: Lazy<Selector> = Lazy::new(|| sel("#accept-all-cookies"));

static ROOMS_RE: Lazy<Regex> = Lazy::new(|| re(r"(?i)(\d+(?:,\d+)?)\s*Zimmer"));
static AREA_RE: Lazy<Regex> = Lazy::new(|| re(r"(\d+(?:,\d+)?)\s*m²"));
static RENT_RE: Lazy<Regex> = Lazy::new(|| re(r"(\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?)\s*€"));
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| re(r"\|\s*([^|]+)"));
static SNAPSHOT_DEEPLINK_RE: Lazy<Regex> = Lazy::new(|| re(r#""deeplink"\s*:\s*"([^"]+)""#));
static SNAPSHOT_COSTS_RE: Lazy<Regex> = Lazy::new(|| re(r#""extraCosts"\s*:\s*"([^"]+)""#));
static SNAPSHOT_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| re(r#""(?:imagePath|imageUrl)"\s*:\s*"([^"]+)""#));
static SNAPSHOT_WBS_RE: Lazy<Regex> =
    Lazy::new(|| re(r#""label"\s*:\s*"WBS"[^}]*?"value"\s*:\s*"([^"]+)""#));

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

fn re(s: &str) -> Regex {
    Regex::new(s).expect("static regex")
}

/// Why a single listing container was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("listing container without an identifier (element id {0:?})")]
    MissingId(String),
    #[error("listing {listing_id}: unparseable {field} in {raw:?}")]
    Malformed {
        listing_id: String,
        field: &'static str,
        raw: String,
    },
}

/// Result of parsing one page.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub listings: Vec<Listing>,
    pub rejected: Vec<ExtractionError>,
    /// A consent banner was present; the fetcher did not get past it.
    pub consent_wall: bool,
}

/// Parse every listing container on the page. Duplicate ids keep their first
/// occurrence. Relative links are resolved against `base`.
pub fn extract(markup: &str, base: &Url) -> Extraction {
    let document = Html::parse_document(markup);
    let mut out = Extraction {
        consent_wall: document.select(&CONSENT_SEL).next().is_some()
            || markup.contains("onCookieAll"),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for container in document.select(&CONTAINER_SEL) {
        match parse_container(container, base) {
            Ok(listing) => {
                if seen.insert(listing.id.clone()) {
                    debug!(
                        listing_id = %listing.id,
                        rooms = ?listing.rooms,
                        area = ?listing.area,
                        cold_rent = ?listing.cold_rent,
                        "extracted listing"
                    );
                    out.listings.push(listing);
                } else {
                    debug!(listing_id = %listing.id, "duplicate listing on page; keeping first");
                }
            }
            Err(err) => {
                warn!(%err, "dropping listing");
                out.rejected.push(err);
            }
        }
    }
    out
}

fn parse_container(container: ElementRef<'_>, base: &Url) -> Result<Listing, ExtractionError> {
    let element_id = container.value().id().unwrap_or_default();
    let id = element_id
        .strip_prefix(CONTAINER_ID_PREFIX)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExtractionError::MissingId(element_id.to_string()))?
        .to_string();

    let summary = summary_text(container);
    let summary_head = summary.split('|').next().unwrap_or_default();

    let rooms = number_field(&id, "rooms", summary_head, &ROOMS_RE, "Zimmer")?;
    let area = number_field(&id, "area", summary_head, &AREA_RE, "m²")?;
    let cold_rent = number_field(&id, "cold rent", summary_head, &RENT_RE, "€")?;
    let address = ADDRESS_RE
        .captures(&summary)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty());

    let mut listing = Listing::new(id, title_for(&summary, address.as_deref()));
    listing.address = address;
    listing.rooms = rooms;
    listing.area = area;
    listing.cold_rent = cold_rent;

    if let Some(snapshot) = container.value().attr("wire:snapshot") {
        apply_snapshot(&mut listing, snapshot, base);
    }
    apply_detail_rows(&mut listing, container);

    if listing.url.is_none() {
        listing.url = container
            .select(&LINK_SEL)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| PROVIDER_HOSTS.iter().any(|p| href.contains(p)))
            .and_then(|href| resolve(base, href));
    }

    Ok(listing)
}

/// Whitespace-normalised text of the title button, falling back to its
/// `aria-label`.
fn summary_text(container: ElementRef<'_>) -> String {
    let button = container
        .select(&TITLE_BUTTON_SEL)
        .next()
        .or_else(|| container.select(&ANY_BUTTON_SEL).next());
    let Some(button) = button else {
        return String::new();
    };
    let text = normalize_ws(&button.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }
    button
        .value()
        .attr("aria-label")
        .map(|label| {
            let label = normalize_ws(label);
            match label.split_once(" - ") {
                Some((prefix, rest)) if prefix.contains("Wohnungsangebot") => rest.to_string(),
                _ => label,
            }
        })
        .unwrap_or_default()
}

/// `None` when `marker` is absent; an error when the marker is there but no
/// number in front of it parses.
fn number_field(
    listing_id: &str,
    field: &'static str,
    text: &str,
    pattern: &Regex,
    marker: &str,
) -> Result<Option<f64>, ExtractionError> {
    let malformed = || ExtractionError::Malformed {
        listing_id: listing_id.to_string(),
        field,
        raw: text.to_string(),
    };
    match pattern.captures(text) {
        Some(c) => parse_german_number(&c[1]).map(Some).ok_or_else(malformed),
        None if text.contains(marker) => Err(malformed()),
        None => Ok(None),
    }
}

/// Parse `1.234,56`-style numbers.
pub fn parse_german_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '.' && *c != ' ').collect();
    cleaned
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn title_for(summary: &str, address: Option<&str>) -> String {
    let raw = match address {
        Some(a) => a,
        None => summary.split('|').next().unwrap_or_default().trim(),
    };
    raw.chars().take(TITLE_MAX_CHARS).collect()
}

fn apply_snapshot(listing: &mut Listing, snapshot: &str, base: &Url) {
    let (deeplink, costs, image, wbs) = match serde_json::from_str::<Value>(snapshot) {
        Ok(json) => (
            find_str(&json, "deeplink"),
            find_str(&json, "extraCosts"),
            find_str(&json, "imagePath").or_else(|| find_str(&json, "imageUrl")),
            find_labelled(&json, "WBS"),
        ),
        Err(err) => {
            debug!(listing_id = %listing.id, %err, "snapshot is not JSON; scanning text");
            let grab = |r: &Regex| r.captures(snapshot).map(|c| unescape(&c[1]));
            (
                grab(&SNAPSHOT_DEEPLINK_RE),
                grab(&SNAPSHOT_COSTS_RE),
                grab(&SNAPSHOT_IMAGE_RE),
                grab(&SNAPSHOT_WBS_RE),
            )
        }
    };

    listing.url = deeplink.and_then(|link| resolve(base, &link));
    listing.extra_costs = costs.map(|c| format!("{} €", c.trim()));
    listing.image_url = image.and_then(|path| image_url(base, &path));
    listing.wbs = wbs;
}

/// Depth-first search for the first string value stored under `key`.
fn find_str(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get(key) {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
            map.values().find_map(|v| find_str(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_str(v, key)),
        _ => None,
    }
}

/// Finds `{"label": <label>, "value": "..."}` anywhere in the tree.
fn find_labelled(value: &Value, label: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if map.get("label").and_then(Value::as_str) == Some(label) {
                if let Some(v) = map.get("value").and_then(Value::as_str) {
                    return Some(v.to_string());
                }
            }
            map.values().find_map(|v| find_labelled(v, label))
        }
        Value::Array(items) => items.iter().find_map(|v| find_labelled(v, label)),
        _ => None,
    }
}

/// Undo JSON escaping for values pulled out with a regex.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.replace("\\/", "/"))
}

fn apply_detail_rows(listing: &mut Listing, container: ElementRef<'_>) {
    for dt in container.select(&DETAIL_DT_SEL) {
        let label = normalize_ws(&dt.text().collect::<String>());
        let dd = dt
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "dd");
        let Some(dd) = dd else { continue };
        let value = normalize_ws(&dd.text().collect::<String>());
        if value.is_empty() {
            continue;
        }
        if label.contains("Nebenkosten") {
            listing.extra_costs = Some(value);
        } else if label.contains("WBS") {
            listing.wbs = Some(value);
        }
    }
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Image paths in snapshots are relative to the site's `/img/` folder.
fn image_url(base: &Url, path: &str) -> Option<String> {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    if path.starts_with("/img/") {
        return resolve(base, path);
    }
    resolve(base, &format!("/img/{}", path.trim_start_matches('/')))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
