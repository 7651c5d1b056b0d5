// View state domain model and location query codec
use std::collections::BTreeMap;

use serde::Serialize;

use super::geometry::{parse_bbox_string, BoundingBox};

pub const PROPERTIES_KEY: &str = "properties";
pub const SELECTED_KEY: &str = "selected";
pub const SORT_KEY: &str = "sort";
pub const ORDER_KEY: &str = "order";
pub const BBOX_KEY: &str = "bbox";

/// Flat key-value view of a location's query portion.
pub type QueryMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "des")]
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "des",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(SortOrder::Ascending),
            "des" => Some(SortOrder::Descending),
            _ => None,
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// What the user is currently looking at.
///
/// Decoded from the location at the start of every render; nothing else is
/// durable. Keys this type does not understand are carried in `extra` so
/// they survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub properties: Vec<String>,
    pub selected: Option<String>,
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
    pub bbox: Option<String>,
    pub extra: QueryMap,
}

impl ViewState {
    /// Builds a view state from a decoded query, substituting
    /// `default_property` when no metric is selected.
    pub fn from_query(query: &QueryMap, default_property: &str) -> Self {
        let mut extra = query.clone();
        let raw_properties = extra.remove(PROPERTIES_KEY);
        let selected = extra.remove(SELECTED_KEY).filter(|v| !v.is_empty());
        let sort = extra.remove(SORT_KEY).filter(|v| !v.is_empty());
        let order = extra.remove(ORDER_KEY).and_then(|v| SortOrder::parse(&v));
        let bbox = extra.remove(BBOX_KEY).filter(|v| !v.is_empty());

        let mut properties = split_properties(raw_properties.as_deref().unwrap_or_default());
        if properties.is_empty() {
            properties.push(default_property.to_string());
        }

        Self {
            properties,
            selected,
            sort,
            order,
            bbox,
            extra,
        }
    }

    pub fn to_query(&self) -> QueryMap {
        let mut query = self.extra.clone();
        if !self.properties.is_empty() {
            query.insert(PROPERTIES_KEY.to_string(), self.properties.join(","));
        }
        if let Some(selected) = &self.selected {
            query.insert(SELECTED_KEY.to_string(), selected.clone());
        }
        if let Some(sort) = &self.sort {
            query.insert(SORT_KEY.to_string(), sort.clone());
        }
        if let Some(order) = self.order {
            query.insert(ORDER_KEY.to_string(), order.as_str().to_string());
        }
        if let Some(bbox) = &self.bbox {
            query.insert(BBOX_KEY.to_string(), bbox.clone());
        }
        query
    }

    pub fn location(&self) -> String {
        encode(&self.to_query())
    }

    /// Order used for sorting; an absent order sorts ascending.
    pub fn effective_order(&self) -> SortOrder {
        self.order.unwrap_or(SortOrder::Ascending)
    }

    pub fn extent_override(&self) -> Option<BoundingBox> {
        self.bbox.as_deref().map(parse_bbox_string)
    }
}

/// True when the query names at least one metric.
pub fn has_properties(query: &QueryMap) -> bool {
    query
        .get(PROPERTIES_KEY)
        .map(|raw| !split_properties(raw).is_empty())
        .unwrap_or(false)
}

fn split_properties(raw: &str) -> Vec<String> {
    let mut properties: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|key| !key.is_empty()) {
        if !properties.iter().any(|existing| existing == key) {
            properties.push(key.to_string());
        }
    }
    properties
}

/// Decodes the query portion of a location string.
///
/// Never fails: a location without a query yields an empty map, and so does
/// one whose percent-encoding is not valid UTF-8.
pub fn decode(location: &str) -> QueryMap {
    let Some((_, rest)) = location.split_once('?') else {
        return QueryMap::new();
    };
    let search = rest.split('#').next().unwrap_or_default();

    let mut query = QueryMap::new();
    for pair in search.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let (Some(key), Some(value)) = (decode_component(raw_key), decode_component(raw_value))
        else {
            tracing::debug!("Malformed location query, falling back to empty state: {}", location);
            return QueryMap::new();
        };
        if !key.is_empty() {
            query.insert(key, value);
        }
    }
    query
}

fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Serializes a query map into a canonical location string (`?a=1&b=2`).
/// Keys come out sorted; an empty map encodes to an empty string.
pub fn encode(query: &QueryMap) -> String {
    if query.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect();
    format!("?{}", pairs.join("&"))
}
