/// Access strategy selection
///
/// Picks the cheapest physical access pattern for a filter across the
/// primary key and every secondary index, and splits the filter into the
/// key-condition part and the post-filter part.
///
/// Ranking, best first: direct get, range query, partition query, scan.
/// Indices are evaluated in declaration order and the first index offering
/// a direct get wins outright.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::index::Index;
use crate::prop::Prop;
use crate::{Error, Item, Result};

type Filter = Map<String, Json>;

/// Physical access pattern, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    Scan,
    PartitionQuery,
    RangeQuery,
    DirectGet,
}

/// How a key component takes part in a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    /// Concrete scalar (or a static key, which is always satisfied)
    Value,
    /// Operator object such as a range or comparison
    Query,
    /// Field absent
    Null,
}

/// Selected access plan
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// Key props used by the key condition
    pub keys: Vec<Prop>,
    pub table: String,
    /// Slot of the chosen index; `None` for a scan
    pub index: Option<usize>,
    /// Secondary index name; `None` for the primary key and scans
    pub index_name: Option<String>,
    /// Filter entries matching the chosen key props
    pub query: Filter,
    /// Everything else, applied as a post-filter
    pub filter: Filter,
}

impl Strategy {
    /// Builds the encoded key of a direct get (`alias -> value`).
    pub fn key(&self) -> Result<Item> {
        if self.kind != StrategyKind::DirectGet {
            return Err(Error::InvalidQuery(format!(
                "{:?} strategy has no single item key",
                self.kind
            )));
        }

        let mut key = Item::new();
        for prop in &self.keys {
            let value = if prop.is_static() {
                prop.static_value()
            } else {
                let raw = self
                    .query
                    .get(prop.name())
                    .map(equality_operand)
                    .ok_or_else(|| Error::InvalidQuery(format!("missing key value for {}", prop.name())))?;
                prop.encode(raw)?
            };
            key.insert(prop.alias.clone(), value);
        }
        Ok(key)
    }
}

/// Unwraps `{$eq: v}` to `v`.
fn equality_operand(json: &Json) -> &Json {
    match json {
        Json::Object(ops) if ops.len() == 1 => ops.get("$eq").unwrap_or(json),
        other => other,
    }
}

fn is_concrete(json: &Json) -> bool {
    matches!(json, Json::String(_) | Json::Number(_) | Json::Bool(_))
}

/// Classifies one key component against a filter.
pub fn classify(prop: &Prop, filter: &Filter) -> KeyMatch {
    if prop.is_static() {
        return KeyMatch::Value;
    }

    match filter.get(prop.name()) {
        Some(json) if is_concrete(json) => KeyMatch::Value,
        Some(Json::Object(ops)) => {
            if ops.len() == 1 && ops.get("$eq").map(is_concrete).unwrap_or(false) {
                KeyMatch::Value
            } else {
                KeyMatch::Query
            }
        }
        _ => KeyMatch::Null,
    }
}

/// Chooses the best-ranked access plan for `filter`.
pub fn select_strategy(table: &str, indexes: &[Index], filter: &Filter) -> Strategy {
    let mut best: Option<(StrategyKind, &Index)> = None;

    for index in indexes {
        if classify(&index.pk, filter) != KeyMatch::Value {
            continue;
        }

        let candidate = match classify(&index.sk, filter) {
            KeyMatch::Value => {
                best = Some((StrategyKind::DirectGet, index));
                break;
            }
            KeyMatch::Query => StrategyKind::RangeQuery,
            KeyMatch::Null => StrategyKind::PartitionQuery,
        };

        if best.map(|(kind, _)| candidate > kind).unwrap_or(true) {
            best = Some((candidate, index));
        }
    }

    let strategy = match best {
        None => Strategy {
            kind: StrategyKind::Scan,
            keys: Vec::new(),
            table: table.to_string(),
            index: None,
            index_name: None,
            query: Filter::new(),
            filter: filter.clone(),
        },
        Some((kind, index)) => {
            let keys = match kind {
                StrategyKind::PartitionQuery => vec![index.pk.clone()],
                _ => vec![index.pk.clone(), index.sk.clone()],
            };
            let (query, rest) = split_filter(filter, &keys);
            Strategy {
                kind,
                keys,
                table: table.to_string(),
                index: Some(index.slot),
                index_name: index.name(table),
                query,
                filter: rest,
            }
        }
    };

    tracing::debug!(
        table,
        kind = ?strategy.kind,
        index = ?strategy.index_name,
        "selected access strategy"
    );

    strategy
}

/// Splits a filter into the entries naming one of `keys` and the rest.
pub fn split_filter(filter: &Filter, keys: &[Prop]) -> (Filter, Filter) {
    let mut query = Filter::new();
    let mut rest = Filter::new();

    for (field, value) in filter {
        let is_key = keys.iter().any(|k| !k.is_static() && k.name() == field);
        if is_key {
            query.insert(field.clone(), value.clone());
        } else {
            rest.insert(field.clone(), value.clone());
        }
    }

    (query, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_indexes, KeySpec};
    use crate::{Prop, Value};
    use serde_json::json;

    fn filter(json: Json) -> Filter {
        json.as_object().cloned().unwrap()
    }

    fn indexes(specs: &[KeySpec]) -> Vec<Index> {
        let mut props = vec![
            Prop::string("repoId"),
            Prop::string("docId"),
            Prop::string("status"),
            Prop::number("created"),
            Prop::string("title"),
        ];
        build_indexes(specs, &mut props).unwrap()
    }

    #[test]
    fn test_classify() {
        let idx = indexes(&[KeySpec::with_sk("repoId", "REPO#")]);
        let f = filter(json!({"repoId": "r1"}));
        assert_eq!(classify(&idx[0].pk, &f), KeyMatch::Value);
        assert_eq!(classify(&idx[0].sk, &f), KeyMatch::Value);

        let f = filter(json!({"repoId": {"$gt": "a"}}));
        assert_eq!(classify(&idx[0].pk, &f), KeyMatch::Query);

        let f = filter(json!({"repoId": {"$eq": "a"}}));
        assert_eq!(classify(&idx[0].pk, &f), KeyMatch::Value);

        let f = filter(json!({"title": "x"}));
        assert_eq!(classify(&idx[0].pk, &f), KeyMatch::Null);
    }

    #[test]
    fn test_scan_when_no_partition_key() {
        let idx = indexes(&[KeySpec::with_sk("repoId", "docId")]);
        let s = select_strategy("docs", &idx, &filter(json!({"title": "x"})));
        assert_eq!(s.kind, StrategyKind::Scan);
        assert!(s.keys.is_empty());
        assert!(s.query.is_empty());
        assert_eq!(s.filter.len(), 1);
        assert_eq!(s.index, None);
    }

    #[test]
    fn test_direct_get_on_primary() {
        let idx = indexes(&[KeySpec::with_sk("repoId", "docId")]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": "r1", "docId": "d1", "title": "x"})));
        assert_eq!(s.kind, StrategyKind::DirectGet);
        assert_eq!(s.index_name, None);
        assert_eq!(s.query.len(), 2);
        assert_eq!(s.filter.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_first_direct_get_wins() {
        let idx = indexes(&[
            KeySpec::with_sk("status", "created"),
            KeySpec::with_sk("repoId", "docId"),
            KeySpec::with_sk("docId", "repoId"),
        ]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": "r1", "docId": "d1"})));
        assert_eq!(s.kind, StrategyKind::DirectGet);
        assert_eq!(s.index, Some(1));
        assert_eq!(s.index_name.as_deref(), Some("docs-gsi-1"));
    }

    #[test]
    fn test_range_outranks_earlier_partition_query() {
        let idx = indexes(&[
            KeySpec::with_sk("repoId", "docId"),
            KeySpec::with_sk("repoId", "created"),
        ]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": "r1", "created": {"$gt": 10}})));
        assert_eq!(s.kind, StrategyKind::RangeQuery);
        assert_eq!(s.index, Some(1));
        assert_eq!(s.keys.len(), 2);
        assert!(s.query.contains_key("created"));
        assert!(s.filter.is_empty());
    }

    #[test]
    fn test_equal_rank_keeps_earliest() {
        let idx = indexes(&[
            KeySpec::with_sk("repoId", "docId"),
            KeySpec::with_sk("repoId", "created"),
        ]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": "r1"})));
        assert_eq!(s.kind, StrategyKind::PartitionQuery);
        assert_eq!(s.index, Some(0));
        assert_eq!(s.keys.len(), 1);
    }

    #[test]
    fn test_static_sort_key_counts_as_value() {
        let idx = indexes(&[
            KeySpec::with_sk("repoId", "docId"),
            KeySpec::with_sk("docId", "REPO#"),
        ]);
        let s = select_strategy("docs", &idx, &filter(json!({"docId": "d1"})));
        assert_eq!(s.kind, StrategyKind::DirectGet);
        assert_eq!(s.index_name.as_deref(), Some("docs-gsi-1"));

        let key = s.key().unwrap();
        assert_eq!(key["pk1"], Value::string("d1"));
        assert_eq!(key["sk1"], Value::string("REPO#"));
    }

    #[test]
    fn test_key_applies_prefix_and_unwraps_eq() {
        let idx = indexes(&[KeySpec::with_sk("REPO#repoId", "DOC#docId")]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": {"$eq": "r1"}, "docId": "d1"})));
        let key = s.key().unwrap();
        assert_eq!(key["pk"], Value::string("REPO#r1"));
        assert_eq!(key["sk"], Value::string("DOC#d1"));
    }

    #[test]
    fn test_key_requires_direct_get() {
        let idx = indexes(&[KeySpec::with_sk("repoId", "docId")]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": "r1"})));
        assert!(s.key().is_err());
    }

    #[test]
    fn test_null_and_array_do_not_count() {
        let idx = indexes(&[KeySpec::with_sk("repoId", "docId")]);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": null})));
        assert_eq!(s.kind, StrategyKind::Scan);
        let s = select_strategy("docs", &idx, &filter(json!({"repoId": ["a"]})));
        assert_eq!(s.kind, StrategyKind::Scan);
    }
}
