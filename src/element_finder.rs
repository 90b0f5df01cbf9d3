//! Structural extraction of stock signals from a product page.
//!
//! Both acquisition strategies hand their HTML to [`extract_signals`]; which CSS
//! selectors are used comes from a declarative [`SelectorTable`] keyed by vendor.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::models::{Catalog, PageSignals, SelectorOverride};

const MAX_LABEL_CHARS: usize = 50;
const MAX_ACTION_LABELS: usize = 10;
const MAX_STOCK_LABELS: usize = 10;
const MAX_PRICE_LABELS: usize = 5;

static MONEY_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\$£€¥]\d+|\d+\.\d{2}").expect("valid money regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorSet {
    pub action: Vec<String>,
    pub stock: Vec<String>,
    pub price: Vec<String>,
}

impl SelectorSet {
    fn from_strs(action: &[&str], stock: &[&str], price: &[&str]) -> Self {
        let own = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            action: own(action),
            stock: own(stock),
            price: own(price),
        }
    }

    /// Rule set used for any vendor without an override.
    pub fn generic() -> Self {
        Self::from_strs(
            &[
                "button",
                ".btn",
                ".button",
                "input[type=\"submit\"]",
                ".add-to-cart",
                ".sold-out-btn",
            ],
            &[
                ".sold-out",
                ".out-of-stock",
                ".in-stock",
                ".stock",
                ".stock-status",
                ".availability",
                ".unavailable",
            ],
            &[".price", ".money", ".cost", "[data-price]"],
        )
    }

    fn overridden_by(&self, patch: &SelectorOverride) -> Self {
        Self {
            action: patch.action.clone().unwrap_or_else(|| self.action.clone()),
            stock: patch.stock.clone().unwrap_or_else(|| self.stock.clone()),
            price: patch.price.clone().unwrap_or_else(|| self.price.clone()),
        }
    }
}

/// `vendorKey -> selectors`, falling back to [`SelectorSet::generic`].
#[derive(Debug, Clone)]
pub struct SelectorTable {
    generic: SelectorSet,
    overrides: HashMap<String, SelectorSet>,
}

impl SelectorTable {
    pub fn new(generic: SelectorSet) -> Self {
        Self {
            generic,
            overrides: HashMap::new(),
        }
    }

    /// Generic rules plus the storefront layouts we already know about.
    pub fn builtin() -> Self {
        let mut table = Self::new(SelectorSet::generic());
        let shopify_price = [".price", ".money", "[class*=\"price\"]"];

        table.insert(
            "ippodo-us",
            SelectorSet::from_strs(
                &["button[name=\"add\"]", "button[type=\"submit\"]", ".btn-product-form", "input[value*=\"Add\"]"],
                &[".sold-out", ".unavailable", ".out-of-stock"],
                &shopify_price,
            ),
        );
        table.insert(
            "ippodo-global",
            SelectorSet::from_strs(
                &["button[type=\"submit\"]", ".add-to-cart", "input[value*=\"Add\"]"],
                &[".sold-out", ".out-of-stock", "[class*=\"unavailable\"]"],
                &[".price", ".amount", "[class*=\"price\"]"],
            ),
        );
        table.insert(
            "marukyu-koyamaen",
            SelectorSet::from_strs(
                &["input[type=\"submit\"]", ".cart-button", "button[name*=\"add\"]"],
                &[".sold-out", ".out-of-stock"],
                &[".price", ".cost", "[class*=\"price\"]", "[class*=\"cost\"]"],
            ),
        );
        table.insert(
            "sazen-tea",
            SelectorSet::from_strs(
                &["button[name=\"add\"]", ".add-to-cart-btn", "input[value*=\"Add\"]"],
                &[".unavailable", ".sold-out", ".out-of-stock"],
                &[".price", ".regular-price", "[class*=\"price\"]"],
            ),
        );
        table.insert(
            "mizuba-tea",
            SelectorSet::from_strs(
                &["button[name=\"add\"]", ".btn[type=\"submit\"]", "input[name=\"add\"]"],
                &[".sold-out", ".unavailable"],
                &[".price", ".money", "[data-price]"],
            ),
        );
        table.insert(
            "rocky-matcha",
            SelectorSet::from_strs(
                &["button[name=\"add\"]", ".add-to-cart", "input[value*=\"Add\"]"],
                &[".out-of-stock", ".sold-out", ".unavailable"],
                &[".price", ".cost", "[class*=\"price\"]"],
            ),
        );
        table.insert(
            "yugen-tea",
            SelectorSet::from_strs(
                &["button[name=\"add\"]", ".btn-product-form", "input[type=\"submit\"]"],
                &[".sold-out", ".unavailable", ".out-of-stock"],
                &shopify_price,
            ),
        );

        table
    }

    /// Built-in table with catalog-declared selectors layered on top.
    pub fn with_catalog(catalog: &Catalog) -> Self {
        let mut table = Self::builtin();
        for (vendor_key, vendor) in &catalog.vendors {
            if let Some(patch) = &vendor.selectors {
                let merged = table.for_vendor(vendor_key).overridden_by(patch);
                tracing::debug!(vendor = %vendor_key, "Using catalog selector override");
                table.insert(vendor_key, merged);
            }
        }
        table
    }

    pub fn insert(&mut self, vendor_key: &str, selectors: SelectorSet) {
        self.overrides.insert(vendor_key.to_string(), selectors);
    }

    pub fn for_vendor(&self, vendor_key: &str) -> &SelectorSet {
        self.overrides.get(vendor_key).unwrap_or(&self.generic)
    }

    pub fn has_override(&self, vendor_key: &str) -> bool {
        self.overrides.contains_key(vendor_key)
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Pulls action, stock and price labels plus the title out of `html`.
pub fn extract_signals(html: &str, selectors: &SelectorSet, page_url: &str) -> PageSignals {
    let document = Html::parse_document(html);

    let action_labels = collect_labels(&document, &selectors.action, MAX_ACTION_LABELS, |_| true);
    let stock_labels = collect_labels(&document, &selectors.stock, MAX_STOCK_LABELS, |_| true);
    let price_labels = collect_labels(&document, &selectors.price, MAX_PRICE_LABELS, |text| {
        MONEY_LIKE.is_match(text)
    });

    let page_title = Selector::parse("title")
        .ok()
        .and_then(|title| document.select(&title).next().map(element_text))
        .unwrap_or_default();

    PageSignals {
        action_labels,
        stock_labels,
        price_labels,
        page_title,
        final_url: page_url.to_string(),
    }
}

fn collect_labels(
    document: &Html,
    selectors: &[String],
    limit: usize,
    accept: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();

    for selector_str in selectors {
        let selector = match Selector::parse(selector_str) {
            Ok(selector) => selector,
            Err(e) => {
                tracing::debug!(selector = %selector_str, error = ?e, "Skipping invalid selector");
                continue;
            }
        };

        for element in document.select(&selector) {
            let text = element_text(element);
            if text.is_empty() || text.chars().count() >= MAX_LABEL_CHARS || !accept(&text) {
                continue;
            }
            if seen.insert(text.clone()) {
                labels.push(text);
                if labels.len() >= limit {
                    return labels;
                }
            }
        }
    }

    labels
}

/// Whitespace-collapsed text content; inputs fall back to their `value`.
fn element_text(element: ElementRef<'_>) -> String {
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return text;
    }
    element
        .value()
        .attr("value")
        .map(collapse_whitespace)
        .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
