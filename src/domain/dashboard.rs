// Dashboard view model handed to the table, counters, chart and map widgets
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dataset::{Domain, Record, Totals};
use super::legend::LegendMarker;
use super::view_state::SortOrder;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub properties: Vec<String>,
    pub selected: Option<String>,
    pub sort: Option<String>,
    pub order: SortOrder,
    pub pending: bool,
    pub status: DataStatus,
    pub totals: Totals,
    pub domain: Domain,
    pub counters: Vec<Counter>,
    pub rows: Vec<TableRow>,
    pub map: MapView,
    pub chart: ChartView,
    pub live_text: Option<LiveText>,
}

/// Loading/error indicator of one dataset. An error never hides data that
/// was already loaded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStatus {
    pub pending: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DataStatus {
    pub info: DatasetStatus,
    pub current: DatasetStatus,
    pub layers: DatasetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Counter {
    pub key: String,
    pub count: f64,
    pub color: Option<String>,
    pub selected: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub id: Option<String>,
    pub label: Option<String>,
    pub selected: bool,
    pub values: Record,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub key: String,
    pub size: f64,
    pub fill: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub circles: Vec<MapCircle>,
    pub highlighted: Option<String>,
    pub highlight_color: String,
    pub legend: Vec<LegendMarker>,
    pub swatches: Vec<Swatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapCircle {
    pub id: String,
    pub property: String,
    pub radius: f64,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Swatch {
    pub property: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartView {
    pub pending: bool,
    pub error: Option<String>,
    pub series: Vec<Record>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveText {
    pub date: DateTime<Utc>,
    pub confirmed: f64,
    pub deaths: f64,
}

impl LiveText {
    /// Only shown once a refresh happened and both counts are non-zero.
    pub fn from_totals(date: Option<DateTime<Utc>>, confirmed: Option<f64>, deaths: Option<f64>) -> Option<Self> {
        match (date, confirmed, deaths) {
            (Some(date), Some(confirmed), Some(deaths)) if confirmed != 0.0 && deaths != 0.0 => Some(Self {
                date,
                confirmed,
                deaths,
            }),
            _ => None,
        }
    }
}
