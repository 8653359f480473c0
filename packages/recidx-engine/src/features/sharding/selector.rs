use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use recidx_model::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum ShardSelectorError {
    #[error("invalid sharding configuration: {0}")]
    Config(String),

    #[error("failed to parse sharding configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("non-numeric value {value:?} for range-mapped property {property:?}")]
    NonNumericValue { property: String, value: String },

    #[error("record id {0} matches no sharding rule and no default shard is configured")]
    Unmapped(RecordId),
}

/// Maps a record id to the name of the shard its documents live on.
///
/// The default variant hashes the record id over a fixed shard list, so
/// the mapping is stable as long as the topology is unchanged. The rule
/// variant evaluates an ordered list of declarative rules against the
/// id's variant properties, falling through to an optional default.
#[derive(Debug, Clone)]
pub enum ShardSelector {
    Hash { shards: Vec<String> },
    Rules { rules: Vec<ShardingRule>, default: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ShardingRule {
    shard: String,
    matcher: RuleMatcher,
}

#[derive(Debug, Clone)]
enum RuleMatcher {
    /// Hash the full record id over a shard list. Always matches.
    RecordIdHash { shards: Vec<String> },
    /// Variant property equals one of the listed strings.
    PropertyEquals { property: String, values: BTreeSet<String> },
    /// Variant property parses as an integer inside the inclusive range.
    PropertyRange { property: String, min: Option<i64>, max: Option<i64> },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectorJson {
    #[serde(default)]
    rules: Vec<RuleJson>,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleJson {
    #[serde(default)]
    shard: Option<String>,
    #[serde(default)]
    hash: Option<HashJson>,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    values: Option<Vec<String>>,
    #[serde(default)]
    range: Option<RangeJson>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HashJson {
    shards: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeJson {
    #[serde(default)]
    min: Option<i64>,
    #[serde(default)]
    max: Option<i64>,
}

impl ShardSelector {
    /// Hash-based selector over the given shard map. Only the (sorted)
    /// shard names participate in selection; the addresses are carried
    /// by the index definition.
    pub fn default_selector(
        shards: &BTreeMap<String, String>,
    ) -> Result<ShardSelector, ShardSelectorError> {
        if shards.is_empty() {
            return Err(ShardSelectorError::Config("no shards configured".into()));
        }
        Ok(ShardSelector::Hash { shards: shards.keys().cloned().collect() })
    }

    /// Single-shard selector, used when an index has exactly one target.
    pub fn single(shard: impl Into<String>) -> ShardSelector {
        ShardSelector::Hash { shards: vec![shard.into()] }
    }

    /// Builds a rule-based selector from its JSON document.
    pub fn from_json(data: &[u8]) -> Result<ShardSelector, ShardSelectorError> {
        let parsed: SelectorJson = serde_json::from_slice(data)?;
        let mut rules = Vec::with_capacity(parsed.rules.len());
        for rule in parsed.rules {
            rules.push(build_rule(rule)?);
        }
        if rules.is_empty() && parsed.default.is_none() {
            return Err(ShardSelectorError::Config(
                "sharding configuration has no rules and no default shard".into(),
            ));
        }
        Ok(ShardSelector::Rules { rules, default: parsed.default })
    }

    /// All shard names this selector can produce.
    pub fn shards(&self) -> BTreeSet<String> {
        match self {
            ShardSelector::Hash { shards } => shards.iter().cloned().collect(),
            ShardSelector::Rules { rules, default } => {
                let mut out: BTreeSet<String> = BTreeSet::new();
                for rule in rules {
                    match &rule.matcher {
                        RuleMatcher::RecordIdHash { shards } => out.extend(shards.iter().cloned()),
                        _ => {
                            out.insert(rule.shard.clone());
                        }
                    }
                }
                if let Some(default) = default {
                    out.insert(default.clone());
                }
                out
            }
        }
    }

    pub fn select(&self, id: &RecordId) -> Result<&str, ShardSelectorError> {
        match self {
            ShardSelector::Hash { shards } => Ok(hash_pick(id, shards)),
            ShardSelector::Rules { rules, default } => {
                for rule in rules {
                    if let Some(shard) = rule.apply(id)? {
                        return Ok(shard);
                    }
                }
                match default {
                    Some(shard) => Ok(shard),
                    None => Err(ShardSelectorError::Unmapped(id.clone())),
                }
            }
        }
    }
}

impl ShardingRule {
    fn apply<'a>(&'a self, id: &RecordId) -> Result<Option<&'a str>, ShardSelectorError> {
        match &self.matcher {
            RuleMatcher::RecordIdHash { shards } => Ok(Some(hash_pick(id, shards))),
            RuleMatcher::PropertyEquals { property, values } => {
                match id.variant_props().get(property) {
                    Some(value) if values.contains(value) => Ok(Some(&self.shard)),
                    _ => Ok(None),
                }
            }
            RuleMatcher::PropertyRange { property, min, max } => {
                let Some(value) = id.variant_props().get(property) else {
                    return Ok(None);
                };
                let number: i64 = value.parse().map_err(|_| {
                    ShardSelectorError::NonNumericValue {
                        property: property.clone(),
                        value: value.clone(),
                    }
                })?;
                let above_min = min.map_or(true, |min| number >= min);
                let below_max = max.map_or(true, |max| number <= max);
                Ok((above_min && below_max).then_some(self.shard.as_str()))
            }
        }
    }
}

fn build_rule(rule: RuleJson) -> Result<ShardingRule, ShardSelectorError> {
    match rule {
        RuleJson { hash: Some(hash), shard: None, property: None, values: None, range: None } => {
            if hash.shards.is_empty() {
                return Err(ShardSelectorError::Config("hash rule lists no shards".into()));
            }
            Ok(ShardingRule {
                shard: String::new(),
                matcher: RuleMatcher::RecordIdHash { shards: hash.shards },
            })
        }
        RuleJson {
            shard: Some(shard),
            property: Some(property),
            values: Some(values),
            range: None,
            hash: None,
        } => Ok(ShardingRule {
            shard,
            matcher: RuleMatcher::PropertyEquals {
                property,
                values: values.into_iter().collect(),
            },
        }),
        RuleJson {
            shard: Some(shard),
            property: Some(property),
            range: Some(range),
            values: None,
            hash: None,
        } => {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(ShardSelectorError::Config(format!(
                        "empty range [{min}, {max}] for property {property:?}"
                    )));
                }
            }
            Ok(ShardingRule {
                shard,
                matcher: RuleMatcher::PropertyRange { property, min: range.min, max: range.max },
            })
        }
        _ => Err(ShardSelectorError::Config(
            "each rule needs either a hash block, or a shard plus one of values/range".into(),
        )),
    }
}

fn hash_pick<'a>(id: &RecordId, shards: &'a [String]) -> &'a str {
    let digest = Sha256::digest(id.to_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let slot = (u64::from_be_bytes(prefix) % shards.len() as u64) as usize;
    &shards[slot]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(json: &str) -> ShardSelector {
        ShardSelector::from_json(json.as_bytes()).unwrap()
    }

    fn variant(prop: &str, value: &str) -> RecordId {
        RecordId::variant("doc", [(prop.to_string(), value.to_string())].into_iter().collect())
    }

    #[test]
    fn record_id_hash_rule_always_maps() {
        let selector = selector(r#"{"rules": [{"hash": {"shards": ["shard1", "shard2"]}}]}"#);
        let shard = selector.select(&RecordId::master("doc-1")).unwrap();
        assert!(shard == "shard1" || shard == "shard2");
    }

    #[test]
    fn string_equality_rule() {
        let selector = selector(
            r#"{
                "rules": [
                    {"shard": "shard1", "property": "transport", "values": ["car", "bike"]},
                    {"shard": "shard2", "property": "transport", "values": ["boat"]}
                ],
                "default": "shard3"
            }"#,
        );

        assert_eq!(selector.select(&variant("transport", "car")).unwrap(), "shard1");
        assert_eq!(selector.select(&variant("transport", "boat")).unwrap(), "shard2");
        assert_eq!(selector.select(&variant("transport", "plane")).unwrap(), "shard3");
    }

    #[test]
    fn numeric_range_rule() {
        let selector = selector(
            r#"{
                "rules": [
                    {"shard": "shard1", "property": "weight", "range": {"max": 999}},
                    {"shard": "shard2", "property": "weight", "range": {"min": 1000, "max": 9999}},
                    {"shard": "shard3", "property": "weight", "range": {"min": 10000}}
                ]
            }"#,
        );

        let at = |weight: &str| variant("weight", weight);
        assert_eq!(selector.select(&at("400")).unwrap(), "shard1");
        assert_eq!(selector.select(&at("1000")).unwrap(), "shard2");
        assert_eq!(selector.select(&at("1200")).unwrap(), "shard2");
        assert_eq!(selector.select(&at("341234123")).unwrap(), "shard3");

        let err = selector.select(&at("abc")).unwrap_err();
        assert!(matches!(err, ShardSelectorError::NonNumericValue { .. }));
    }

    #[test]
    fn unmatched_without_default_is_an_error() {
        let selector = selector(
            r#"{"rules": [{"shard": "shard1", "property": "lang", "values": ["en"]}]}"#,
        );
        let id = variant("lang", "nl");
        assert!(matches!(selector.select(&id), Err(ShardSelectorError::Unmapped(_))));
    }

    #[test]
    fn default_selector_is_stable_and_spreads() {
        let shards: BTreeMap<String, String> = [
            ("shard1".to_string(), "http://search1".to_string()),
            ("shard2".to_string(), "http://search2".to_string()),
            ("shard3".to_string(), "http://search3".to_string()),
        ]
        .into_iter()
        .collect();
        let selector = ShardSelector::default_selector(&shards).unwrap();

        let mut used = BTreeSet::new();
        for i in 0..50 {
            let id = RecordId::master(format!("doc-{i}"));
            let shard = selector.select(&id).unwrap();
            assert_eq!(selector.select(&id).unwrap(), shard);
            used.insert(shard.to_string());
        }
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn empty_configuration_is_rejected() {
        assert!(ShardSelector::from_json(b"{}").is_err());
        assert!(ShardSelector::default_selector(&BTreeMap::new()).is_err());
    }
}
