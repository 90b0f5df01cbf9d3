use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use url::Url;

use crate::utils::error::AppError;

/// Immutable vendor/product/supplier tree loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    #[serde(default)]
    pub vendors: BTreeMap<String, Vendor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vendor {
    pub name: String,
    #[serde(default)]
    pub products: Vec<Product>,
    /// Extraction selectors for this storefront; replaces the generic set per list.
    #[serde(default)]
    pub selectors: Option<SelectorOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectorOverride {
    pub action: Option<Vec<String>>,
    pub stock: Option<Vec<String>>,
    pub price: Option<Vec<String>>,
}

/// One monitored URL: a `(vendor, product, supplier)` triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Leaf {
    pub vendor_key: String,
    pub vendor_name: String,
    pub product: String,
    pub supplier: String,
    pub url: String,
}

impl Leaf {
    /// Composite key used by the state store: `{vendorKey}_{productName}_{supplierName}`.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.vendor_key, self.product, self.supplier)
    }
}

impl Catalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Catalog(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_toml_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            vendors = catalog.vendors.len(),
            leaves = catalog.leaf_count(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        let catalog: Catalog = toml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Every leaf in sweep order: vendor keys sorted, products and suppliers in
    /// declaration order.
    pub fn leaves(&self) -> Vec<Leaf> {
        self.vendors
            .iter()
            .flat_map(|(vendor_key, vendor)| {
                vendor.products.iter().flat_map(move |product| {
                    product.suppliers.iter().map(move |supplier| Leaf {
                        vendor_key: vendor_key.clone(),
                        vendor_name: vendor.name.clone(),
                        product: product.name.clone(),
                        supplier: supplier.name.clone(),
                        url: supplier.url.clone(),
                    })
                })
            })
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.vendors
            .values()
            .flat_map(|v| v.products.iter())
            .map(|p| p.suppliers.len())
            .sum()
    }

    pub fn product_count(&self) -> usize {
        self.vendors.values().map(|v| v.products.len()).sum()
    }

    pub fn vendor(&self, key: &str) -> Option<&Vendor> {
        self.vendors.get(key)
    }

    /// Finds the vendor whose suppliers include `url`, used to pick selectors for
    /// ad-hoc checks.
    pub fn vendor_for_url(&self, url: &str) -> Option<&str> {
        self.leaves()
            .into_iter()
            .find(|leaf| leaf.url == url)
            .and_then(|leaf| self.vendors.get_key_value(&leaf.vendor_key))
            .map(|(key, _)| key.as_str())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();

        for (vendor_key, vendor) in &self.vendors {
            if vendor_key.trim().is_empty() {
                return Err(AppError::Catalog("vendor key must not be empty".into()));
            }
            if vendor.name.trim().is_empty() {
                return Err(AppError::Catalog(format!(
                    "vendor '{}' has an empty display name",
                    vendor_key
                )));
            }

            for product in &vendor.products {
                if product.name.trim().is_empty() {
                    return Err(AppError::Catalog(format!(
                        "vendor '{}' has a product with an empty name",
                        vendor_key
                    )));
                }
                for supplier in &product.suppliers {
                    validate_url(&supplier.url).map_err(|reason| {
                        AppError::Catalog(format!(
                            "{} / {} / {}: {}",
                            vendor_key, product.name, supplier.name, reason
                        ))
                    })?;
                }
            }
        }

        for leaf in self.leaves() {
            let key = leaf.key();
            if !seen.insert(key.clone()) {
                return Err(AppError::Catalog(format!("duplicate leaf key '{}'", key)));
            }
        }

        if seen.is_empty() {
            tracing::warn!("Catalog contains no monitored URLs");
        }

        Ok(())
    }
}

/// Parses `raw` as an absolute http(s) URL.
pub fn parse_page_url(raw: &str) -> Result<Url, AppError> {
    validate_url(raw).map_err(|reason| AppError::InvalidUrl {
        url: raw.to_string(),
        reason,
    })
}

fn validate_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
