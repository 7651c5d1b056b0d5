// Widget events - the only way a new location gets written
use serde::Deserialize;

use crate::domain::geometry::BoundingBox;
use crate::domain::view_state::{SortOrder, ViewState};

/// What a table, counter or map widget asks for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetEvent {
    ToggleProperty { key: String },
    SelectEntity { id: String },
    Sort { key: String },
    MapMoved { bounds: BoundingBox, crs: String },
    ZoomAll,
}

/// Adds `key` while there is room, removes it when present. The last
/// selected metric cannot be removed.
pub fn toggle_property(state: &mut ViewState, key: &str, max_selected: usize) {
    if let Some(position) = state.properties.iter().position(|p| p == key) {
        if state.properties.len() > 1 {
            state.properties.remove(position);
        }
    } else if state.properties.len() < max_selected {
        state.properties.push(key.to_string());
    }
}

/// Selecting the already selected entity clears the selection.
pub fn select_entity(state: &mut ViewState, id: &str) {
    if state.selected.as_deref() == Some(id) {
        state.selected = None;
    } else {
        state.selected = Some(id.to_string());
    }
}

/// Re-sorting by the current key flips the order; a new key starts
/// ascending for the identifier and descending for metrics.
pub fn sort_by(state: &mut ViewState, key: &str, id_property: &str) {
    if state.sort.as_deref() == Some(key) {
        state.order = Some(state.effective_order().flipped());
    } else {
        state.sort = Some(key.to_string());
        state.order = Some(default_order(key, id_property));
    }
}

pub fn default_order(key: &str, id_property: &str) -> SortOrder {
    if key == id_property {
        SortOrder::Ascending
    } else {
        SortOrder::Descending
    }
}
