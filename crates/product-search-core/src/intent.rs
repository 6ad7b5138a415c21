//! Query intent extraction and constraint post-filtering.
//!
//! An [`EntityTagger`] (typically a NER model behind an HTTP service)
//! labels spans of the query. Labels are mapped onto an [`Intent`]:
//!
//! | Label  | Slot |
//! |--------|------|
//! | `MISC` | product type |
//! | `ORG`  | constraint |
//! | `LOC`  | desired attribute |
//!
//! When the tagger produces nothing for a slot, regular-expression
//! fallbacks fill in common colours and `under $N` price ceilings. The
//! primary intent comes from keywords in the query.
//!
//! The intent is advisory. [`apply_constraints`] narrows an already-ranked
//! list by price ceiling, and returns the list untouched if no ceiling
//! parses or if filtering would remove every item.

use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::HasPayload;

static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(red|blue|green|black|white)\b").expect("valid regex"));

static UNDER_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bunder\s+\$?\d[\d,]*(?:\.\d+)?").expect("valid regex")
});

static CEILING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bunder\s*\$?\s*(\d[\d,]*(?:\.\d+)?)").expect("valid regex")
});

/// Coarse purpose of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryIntent {
    Buy,
    Compare,
    FindSimilar,
    #[default]
    Unknown,
}

/// Structured reading of a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Intent {
    pub primary_intent: PrimaryIntent,
    pub product_type: Option<String>,
    pub desired_attributes: Vec<String>,
    pub constraints: Vec<String>,
}

/// A labelled span produced by an [`EntityTagger`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Entity {
    pub word: String,
    pub entity_group: String,
}

/// Named-entity tagging collaborator.
#[async_trait]
pub trait EntityTagger: Send + Sync {
    async fn tag(&self, text: &str) -> Result<Vec<Entity>>;
}

/// Tagger that finds no entities, leaving extraction to the regex rules.
pub struct RuleTagger;

#[async_trait]
impl EntityTagger for RuleTagger {
    async fn tag(&self, _text: &str) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }
}

/// Where in the pipeline the constraint filter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStage {
    /// Filter the semantic hit list before fusion.
    #[default]
    Semantic,
    /// Filter the fused, ranked output.
    Fused,
}

/// Build an [`Intent`] from tagger output plus the query's own text.
pub fn intent_from_entities(query: &str, entities: &[Entity]) -> Intent {
    let mut intent = Intent::default();

    for entity in entities {
        let text = entity.word.trim();
        if text.is_empty() {
            continue;
        }
        match entity.entity_group.as_str() {
            "MISC" => intent.product_type = Some(text.to_string()),
            "ORG" => intent.constraints.push(text.to_string()),
            "LOC" => intent.desired_attributes.push(text.to_string()),
            _ => {}
        }
    }

    if intent.desired_attributes.is_empty() {
        if let Some(m) = COLOR_RE.find(query) {
            intent.desired_attributes.push(m.as_str().to_lowercase());
        }
    }

    if intent.constraints.is_empty() {
        if let Some(m) = UNDER_PRICE_RE.find(query) {
            intent.constraints.push(m.as_str().to_lowercase());
        }
    }

    let lower = query.to_lowercase();
    intent.primary_intent = if lower.contains("buy") {
        PrimaryIntent::Buy
    } else if lower.contains("compare") {
        PrimaryIntent::Compare
    } else if lower.contains("find") || lower.contains("similar") {
        PrimaryIntent::FindSimilar
    } else {
        PrimaryIntent::Unknown
    };

    intent
}

/// Tag `query` and build its [`Intent`]. A tagger failure degrades to
/// the regex rules alone.
pub async fn extract_intent(tagger: &dyn EntityTagger, query: &str) -> Intent {
    let entities = match tagger.tag(query).await {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "entity tagger failed; using rule-based intent only");
            Vec::new()
        }
    };
    let intent = intent_from_entities(query, &entities);
    debug!(?intent, "intent extracted");
    intent
}

/// Price ceilings expressed by the constraints (`"under $500"` → 500.0).
pub fn price_ceilings(constraints: &[String]) -> Vec<f64> {
    constraints
        .iter()
        .filter_map(|c| {
            let caps = CEILING_RE.captures(c)?;
            caps[1].replace(',', "").parse::<f64>().ok()
        })
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect()
}

/// Keep items whose price lies in `(0, ceiling)` for some ceiling in the
/// intent. Returns `items` unchanged if the intent has no usable ceiling
/// or if nothing would survive.
pub fn apply_constraints<T: HasPayload>(intent: &Intent, items: Vec<T>) -> Vec<T> {
    let ceilings = price_ceilings(&intent.constraints);
    if ceilings.is_empty() || items.is_empty() {
        return items;
    }

    let keep: Vec<bool> = items
        .iter()
        .map(|item| match item.payload().price_value() {
            Some(price) if price > 0.0 => ceilings.iter().any(|max| price < *max),
            _ => false,
        })
        .collect();

    if !keep.iter().any(|k| *k) {
        debug!(
            candidates = items.len(),
            "no result satisfies price constraints; leaving list unfiltered"
        );
        return items;
    }

    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, k)| k.then_some(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Hit, ProductPayload};

    fn entity(word: &str, group: &str) -> Entity {
        Entity {
            word: word.to_string(),
            entity_group: group.to_string(),
        }
    }

    fn priced(id: i64, price: Option<&str>) -> Hit {
        Hit {
            id,
            score: 1.0,
            payload: ProductPayload {
                price: price.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rule_fallbacks() {
        let intent = intent_from_entities("Find a red camera under $500 with free shipping", &[]);
        assert_eq!(intent.primary_intent, PrimaryIntent::FindSimilar);
        assert_eq!(intent.desired_attributes, vec!["red"]);
        assert_eq!(intent.constraints, vec!["under $500"]);
        assert_eq!(intent.product_type, None);
    }

    #[test]
    fn test_entity_labels_take_precedence() {
        let entities = vec![
            entity("Leica", "ORG"),
            entity("Berlin", "LOC"),
            entity("Q2", "MISC"),
            entity("Jane", "PER"),
        ];
        let intent = intent_from_entities("buy a black Leica Q2 under $900", &entities);
        assert_eq!(intent.primary_intent, PrimaryIntent::Buy);
        assert_eq!(intent.product_type.as_deref(), Some("Q2"));
        assert_eq!(intent.desired_attributes, vec!["Berlin"]);
        // ORG filled the constraint slot, so the price regex does not run.
        assert_eq!(intent.constraints, vec!["Leica"]);
    }

    #[test]
    fn test_primary_intent_keywords() {
        assert_eq!(
            intent_from_entities("compare these lenses", &[]).primary_intent,
            PrimaryIntent::Compare
        );
        assert_eq!(
            intent_from_entities("something similar to this", &[]).primary_intent,
            PrimaryIntent::FindSimilar
        );
        assert_eq!(
            intent_from_entities("mirrorless body", &[]).primary_intent,
            PrimaryIntent::Unknown
        );
    }

    #[test]
    fn test_price_ceilings_parse_variants() {
        let constraints = vec![
            "under $500".to_string(),
            "under 1,200".to_string(),
            "in stock".to_string(),
        ];
        assert_eq!(price_ceilings(&constraints), vec![500.0, 1200.0]);
    }

    #[test]
    fn test_apply_constraints_filters_by_price() {
        let intent = intent_from_entities("camera under $500", &[]);
        let hits = vec![
            priced(1, Some("$450")),
            priced(2, Some("899")),
            priced(3, None),
            priced(4, Some("0")),
        ];
        let kept: Vec<i64> = apply_constraints(&intent, hits).iter().map(|h| h.id).collect();
        assert_eq!(kept, vec![1]);
    }

    #[test]
    fn test_apply_constraints_never_empties() {
        let intent = intent_from_entities("camera under $100", &[]);
        let hits = vec![priced(1, Some("450")), priced(2, None)];
        let kept = apply_constraints(&intent, hits.clone());
        assert_eq!(kept, hits);
    }

    #[test]
    fn test_apply_constraints_without_ceiling_is_noop() {
        let intent = intent_from_entities("camera", &[entity("Amazon", "ORG")]);
        let hits = vec![priced(1, Some("450"))];
        assert_eq!(apply_constraints(&intent, hits.clone()), hits);
    }

    struct Failing;

    #[async_trait]
    impl EntityTagger for Failing {
        async fn tag(&self, _text: &str) -> Result<Vec<Entity>> {
            anyhow::bail!("tagger offline")
        }
    }

    #[test]
    fn test_tagger_failure_degrades_to_rules() {
        let intent =
            futures::executor::block_on(extract_intent(&Failing, "blue tripod under $80"));
        assert_eq!(intent.desired_attributes, vec!["blue"]);
        assert_eq!(intent.constraints, vec!["under $80"]);
    }
}
