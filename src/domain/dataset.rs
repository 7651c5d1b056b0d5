// Dataset records, joins and aggregates
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use super::view_state::SortOrder;

/// One flat JSON record as returned by a remote endpoint.
pub type Record = serde_json::Map<String, Value>;

/// Keeps only `keys` from `entry`; keys missing from the entry become
/// `null`. An empty key list keeps the whole entry.
pub fn project_record(entry: &Record, keys: &[String]) -> Record {
    if keys.is_empty() {
        return entry.clone();
    }
    keys.iter()
        .map(|key| (key.clone(), entry.get(key).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Identifier of a record under `id_property`, if it is a string or number.
pub fn record_id(record: &Record, id_property: &str) -> Option<String> {
    match record.get(id_property)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Numeric value of a metric; anything that is not a JSON number is absent.
pub fn metric_value(record: &Record, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

/// Static metadata merged with live metrics for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JoinedEntity {
    pub fields: Record,
}

impl JoinedEntity {
    pub fn id(&self, id_property: &str) -> Option<String> {
        record_id(&self.fields, id_property)
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        metric_value(&self.fields, key)
    }
}

/// Joins every current record with its info record. Current fields win on
/// collisions; a current record without info still produces an entity.
pub fn join(info: &[Record], current: &[Record], id_property: &str) -> Vec<JoinedEntity> {
    let info_by_id: HashMap<String, &Record> = info
        .iter()
        .filter_map(|record| record_id(record, id_property).map(|id| (id, record)))
        .collect();

    current
        .iter()
        .map(|record| {
            let mut fields = record_id(record, id_property)
                .and_then(|id| info_by_id.get(&id))
                .map(|info| (*info).clone())
                .unwrap_or_default();
            fields.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
            JoinedEntity { fields }
        })
        .collect()
}

/// Sum of each metric over all records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Totals(BTreeMap<String, f64>);

impl Totals {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }
}

/// Every key in `metric_keys` starts at zero; missing or null values count
/// as zero.
pub fn totals(current: &[Record], metric_keys: &[String]) -> Totals {
    let mut sums: BTreeMap<String, f64> = metric_keys.iter().map(|key| (key.clone(), 0.0)).collect();
    for record in current {
        for (key, sum) in sums.iter_mut() {
            *sum += metric_value(record, key).unwrap_or(0.0);
        }
    }
    Totals(sums)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

/// Range spanned by the selected metrics over all entities; `{0, 0}` when
/// there is nothing to measure.
pub fn domain(entities: &[JoinedEntity], selected_keys: &[String]) -> Domain {
    let mut values = selected_keys
        .iter()
        .flat_map(|key| entities.iter().filter_map(move |entity| entity.value(key)))
        .peekable();
    if values.peek().is_none() {
        return Domain::default();
    }
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    Domain { min, max }
}

/// Linear map from a domain onto a visual range. Values outside the domain
/// extrapolate; a collapsed domain maps everything to the middle of the
/// range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    domain: Domain,
    range: (f64, f64),
}

pub fn scale_linear(domain: Domain, range: (f64, f64)) -> LinearScale {
    LinearScale { domain, range }
}

impl LinearScale {
    pub fn apply(&self, value: f64) -> f64 {
        let span = self.domain.max - self.domain.min;
        let t = if span == 0.0 {
            0.5
        } else {
            (value - self.domain.min) / span
        };
        self.range.0 + t * (self.range.1 - self.range.0)
    }

    /// Scaled value, or `None` when the input is missing or the output is
    /// not drawable.
    pub fn finite(&self, value: Option<f64>) -> Option<f64> {
        value.map(|v| self.apply(v)).filter(|size| size.is_finite())
    }
}

/// Stable sort by `key`. Entities without a value for `key` always go
/// last, whichever the direction.
pub fn sort_entities(entities: &mut [JoinedEntity], key: &str, order: SortOrder) {
    entities.sort_by(|a, b| compare_by_key(&a.fields, &b.fields, key, order));
}

/// Same rule as [`sort_entities`], for raw records.
pub fn sort_records(records: &mut [Record], key: &str, order: SortOrder) {
    records.sort_by(|a, b| compare_by_key(a, b, key, order));
}

fn compare_by_key(a: &Record, b: &Record, key: &str, order: SortOrder) -> Ordering {
    let a = a.get(key).filter(|v| !v.is_null());
    let b = b.get(key).filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Ascending => compare_values(a, b),
            SortOrder::Descending => compare_values(b, a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Total order over present JSON values: numbers, then strings, then
/// booleans; arrays and objects compare equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            _ => 3,
        }
    }
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}
