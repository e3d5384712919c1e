//! Confirmed product model and the form input used to create one

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Upper bound for `max_discount`, in percent.
pub const MAX_DISCOUNT_PERCENT: f64 = 100.0;

/// A server-confirmed product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Server-assigned identifier (opaque)
    pub id: String,
    /// Display name, never empty
    pub name: String,
    /// Optional company name
    #[serde(default)]
    pub company: Option<String>,
    /// Identifier of the company lookup entity, when resolved
    #[serde(default)]
    pub company_id: Option<String>,
    /// Cost price, non-negative
    pub cost_price: f64,
    /// Selling price, non-negative
    pub selling_price: f64,
    /// Maximum discount in percent (0-100)
    #[serde(default)]
    pub max_discount: f64,
    /// Blob store URL of the product image
    #[serde(default)]
    pub image_url: Option<String>,
    /// Authoritative server creation time
    pub created_at: DateTime<Utc>,
    /// Client idempotency key echoed back by the server
    #[serde(default)]
    pub client_ref: Option<String>,
}

/// Fields submitted to the remote store for a single create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub company: Option<String>,
    pub company_id: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub max_discount: f64,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub client_ref: Option<String>,
}

impl NewProduct {
    /// Build the confirmed product the server would return for this request.
    ///
    /// Used when a direct write response arrives before the change stream.
    #[must_use]
    pub fn into_product(self, id: impl Into<String>) -> Product {
        Product {
            id: id.into(),
            name: self.name,
            company: self.company,
            company_id: self.company_id,
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            max_discount: self.max_discount,
            image_url: self.image_url,
            created_at: self.created_at,
            client_ref: self.client_ref,
        }
    }
}

/// Where image bytes come from when a product is submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Raw bytes held in memory, staged to disk on enqueue
    Bytes(Vec<u8>),
    /// A file that already exists locally
    Path(PathBuf),
}

/// Image attached to a product submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub source: ImageSource,
}

/// Form input for creating a product
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductInput {
    pub name: String,
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub max_discount: Option<f64>,
    pub image: Option<ImagePayload>,
}

/// Product input that passed validation, with normalized fields
#[derive(Debug, Clone, PartialEq)]
pub struct ValidProduct {
    pub name: String,
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub max_discount: f64,
    pub image: Option<ImagePayload>,
}

impl ProductInput {
    /// Create input with the required fields
    #[must_use]
    pub fn new(name: impl Into<String>, cost_price: f64, selling_price: f64) -> Self {
        Self {
            name: name.into(),
            cost_price,
            selling_price,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    #[must_use]
    pub const fn with_max_discount(mut self, max_discount: f64) -> Self {
        self.max_discount = Some(max_discount);
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    /// Validate and normalize the input.
    ///
    /// All problems are collected into a single `Error::Validation` message.
    pub fn validate(self) -> Result<ValidProduct> {
        let mut problems = Vec::new();

        let name = self.name.trim().to_string();
        if name.is_empty() {
            problems.push("name is required".to_string());
        }
        check_price("cost price", self.cost_price, &mut problems);
        check_price("selling price", self.selling_price, &mut problems);

        let max_discount = self.max_discount.unwrap_or(0.0);
        if !max_discount.is_finite() || !(0.0..=MAX_DISCOUNT_PERCENT).contains(&max_discount) {
            problems.push(format!(
                "max discount must be between 0 and {MAX_DISCOUNT_PERCENT} (got {max_discount})"
            ));
        }

        if let Some(image) = &self.image {
            if image.file_name.trim().is_empty() {
                problems.push("image file name is required".to_string());
            }
        }

        if !problems.is_empty() {
            return Err(Error::Validation(problems.join("; ")));
        }

        Ok(ValidProduct {
            name,
            company: normalize_text_option(self.company),
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            max_discount,
            image: self.image,
        })
    }
}

fn check_price(label: &str, value: f64, problems: &mut Vec<String>) {
    if !value.is_finite() {
        problems.push(format!("{label} must be a number"));
    } else if value < 0.0 {
        problems.push(format!("{label} cannot be negative (got {value})"));
    }
}
