//! Product records and the per-query result types built from them.
//!
//! A product is identified by a canonical integer id assigned at ingestion
//! time. Both retrieval paths (vector and lexical) report that same id, so
//! score maps from the two sides can be merged by identity.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Canonical product identifier.
pub type ProductId = i64;

/// Structured product payload.
///
/// The common catalogue fields are declared; anything else in the source
/// record is preserved in [`extra`](ProductPayload::extra) so it
/// round-trips through storage and back out in search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Price as it appeared in the catalogue (`"499.99"`, `"$1,200"`, ...).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub price: Option<String>,
    /// Unknown keys, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl ProductPayload {
    /// Look up a field by name, checking declared fields first and then
    /// `extra`. Blank values and the literal `"None"` count as missing.
    pub fn field(&self, name: &str) -> Option<String> {
        let raw = match name {
            "title" => self.title.clone(),
            "description" => self.description.clone(),
            "brand" => self.brand.clone(),
            "category" => self.category.clone(),
            "price" => self.price.clone(),
            other => match self.extra.get(other) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Null) | None => None,
                Some(v) => Some(v.to_string()),
            },
        }?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "None" {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Concatenate the named fields into one searchable string.
    pub fn searchable_text(&self, fields: &[String]) -> String {
        fields
            .iter()
            .filter_map(|f| self.field(f))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse the price field into a number, tolerating currency symbols
    /// and thousands separators.
    pub fn price_value(&self) -> Option<f64> {
        let raw = self.field("price")?;
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
    }
}

/// A product row as held by the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(flatten)]
    pub payload: ProductPayload,
}

/// One entry of a corpus snapshot: canonical id, tokenizable text and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: ProductId,
    pub text: String,
    pub payload: ProductPayload,
}

impl Document {
    /// Build a document from a product, or `None` when none of `fields`
    /// yields any text.
    pub fn from_product(product: Product, fields: &[String]) -> Option<Self> {
        let text = product.payload.searchable_text(fields);
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            id: product.id,
            text,
            payload: product.payload,
        })
    }
}

/// A single retrieval hit with its engine-specific raw score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: ProductId,
    pub score: f64,
    pub payload: ProductPayload,
}

/// Provenance marker carried by every fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Hybrid,
}

/// Scoring breakdown for a fused result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreExplanation {
    /// Normalized lexical score (0.0 if the id had no lexical hit).
    pub lexical_score: f64,
    /// Normalized semantic score (0.0 if the id had no semantic hit).
    pub semantic_score: f64,
    /// Semantic weight used: `fused = (1-α)*lexical + α*semantic`.
    pub alpha: f64,
    pub lexical_candidates: usize,
    pub semantic_candidates: usize,
    /// True when the lexical side was empty and the semantic ranking was
    /// returned as-is.
    pub fallback: bool,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub id: ProductId,
    pub score: f64,
    pub payload: ProductPayload,
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Access to the payload of a ranked item, used by post-retrieval filters.
pub trait HasPayload {
    fn payload(&self) -> &ProductPayload;
}

impl HasPayload for Hit {
    fn payload(&self) -> &ProductPayload {
        &self.payload
    }
}

impl HasPayload for FusedResult {
    fn payload(&self) -> &ProductPayload {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        ["title", "description", "brand", "category"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn payload_keeps_unknown_keys() {
        let json = r#"{"title":"Canon EOS","price":499,"title_left":"canon eos 80d"}"#;
        let payload: ProductPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.title.as_deref(), Some("Canon EOS"));
        assert_eq!(payload.price.as_deref(), Some("499"));
        assert_eq!(
            payload.extra.get("title_left"),
            Some(&serde_json::json!("canon eos 80d"))
        );

        let back = serde_json::to_value(&payload).unwrap();
        assert_eq!(back["title_left"], "canon eos 80d");
    }

    #[test]
    fn searchable_text_skips_blank_and_none() {
        let payload = ProductPayload {
            title: Some("Nikon D750".into()),
            description: Some("None".into()),
            brand: Some("  ".into()),
            category: Some("Cameras".into()),
            ..Default::default()
        };
        assert_eq!(payload.searchable_text(&fields()), "Nikon D750 Cameras");
    }

    #[test]
    fn field_reads_extra_values() {
        let mut payload = ProductPayload::default();
        payload
            .extra
            .insert("brand_left".into(), serde_json::json!("Sony"));
        payload.extra.insert("rating".into(), serde_json::json!(4.5));
        assert_eq!(payload.field("brand_left").as_deref(), Some("Sony"));
        assert_eq!(payload.field("rating").as_deref(), Some("4.5"));
        assert_eq!(payload.field("missing"), None);
    }

    #[test]
    fn price_value_strips_currency() {
        let mut payload = ProductPayload {
            price: Some("$1,299.50".into()),
            ..Default::default()
        };
        assert_eq!(payload.price_value(), Some(1299.5));
        payload.price = Some("call for price".into());
        assert_eq!(payload.price_value(), None);
    }

    #[test]
    fn document_from_empty_product_is_none() {
        let product = Product {
            id: 3,
            payload: ProductPayload::default(),
        };
        assert!(Document::from_product(product, &fields()).is_none());
    }

    #[test]
    fn fused_result_serializes_hybrid_source() {
        let r = FusedResult {
            id: 7,
            score: 0.8,
            payload: ProductPayload::default(),
            source: ResultSource::Hybrid,
            explain: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["source"], "hybrid");
        assert!(v.get("explain").is_none());
    }
}
