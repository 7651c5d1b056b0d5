use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::application::refresh_scheduler::RefreshInterval;
use crate::domain::geometry::BoundingBox;

const MINUTE_MS: u64 = 60 * 1000;

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_id_property")]
    pub id_property: String,
    #[serde(default = "default_label_property")]
    pub label_property: String,
    #[serde(default = "default_property")]
    pub default_property: String,
    #[serde(default = "default_max_selected_properties")]
    pub max_selected_properties: usize,
    #[serde(default)]
    pub live_text: LiveTextConfig,
    #[serde(default = "default_highlight_color")]
    pub highlight_color: String,
    #[serde(default = "default_colors")]
    pub colors: HashMap<String, String>,
    #[serde(default = "default_bbox")]
    pub bbox: BoundingBox,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub vector_layers: VectorLayersConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveTextConfig {
    pub confirmed_property: String,
    pub deaths_property: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub properties_keys: Vec<String>,
    #[serde(default)]
    pub count_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    pub info: EndpointConfig,
    pub current: EndpointConfig,
    #[serde(default)]
    pub daily: Option<String>,
    /// URL template; `{id}` is replaced by the lower-cased entity id.
    #[serde(default)]
    pub daily_entity: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorLayersConfig {
    pub polygon: String,
    pub centroid: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    pub default_interval: RefreshInterval,
    pub intervals: Vec<RefreshInterval>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            id_property: default_id_property(),
            label_property: default_label_property(),
            default_property: default_property(),
            max_selected_properties: default_max_selected_properties(),
            live_text: LiveTextConfig::default(),
            highlight_color: default_highlight_color(),
            colors: default_colors(),
            bbox: default_bbox(),
            endpoints: EndpointsConfig::default(),
            vector_layers: VectorLayersConfig::default(),
            refresh: RefreshConfig::default(),
            request_timeout_ms: None,
        }
    }
}

impl Default for LiveTextConfig {
    fn default() -> Self {
        Self {
            confirmed_property: "positive".to_string(),
            deaths_property: "death".to_string(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            info: EndpointConfig {
                url: "https://covidtracking.com/api/states/info".to_string(),
                properties_keys: strings(&["state", "name"]),
                count_keys: Vec::new(),
            },
            current: EndpointConfig {
                url: "https://covidtracking.com/api/states".to_string(),
                properties_keys: strings(&["state", "dateModified"]),
                count_keys: strings(&[
                    "totalTestResults",
                    "positive",
                    "negative",
                    "death",
                    "recovered",
                    "hospitalizedCurrently",
                    "inIcuCurrently",
                    "onVentilatorCurrently",
                ]),
            },
            daily: Some("https://covidtracking.com/api/us/daily".to_string()),
            daily_entity: Some("https://covidtracking.com/api/v1/states/{id}/daily.json".to_string()),
        }
    }
}

impl Default for VectorLayersConfig {
    fn default() -> Self {
        Self {
            polygon: "static/states-polygon.json".to_string(),
            centroid: "static/states-centroid.json".to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            default_interval: RefreshInterval::new(15 * MINUTE_MS, "15 minutes"),
            intervals: vec![
                RefreshInterval::never(),
                RefreshInterval::new(15 * MINUTE_MS, "15 minutes"),
                RefreshInterval::new(30 * MINUTE_MS, "30 minutes"),
                RefreshInterval::new(60 * MINUTE_MS, "1 hour"),
            ],
        }
    }
}

impl DashboardConfig {
    /// Every metric a sort key may name.
    pub fn metric_keys(&self) -> &[String] {
        &self.endpoints.current.count_keys
    }

    pub fn color(&self, key: &str) -> Option<String> {
        self.colors.get(key).cloned()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Looks up a configured interval by value, labelling unknown values
    /// after their length.
    pub fn refresh_interval(&self, value_ms: u64) -> RefreshInterval {
        self.refresh
            .intervals
            .iter()
            .find(|interval| interval.value_ms == value_ms)
            .cloned()
            .unwrap_or_else(|| RefreshInterval::new(value_ms, format!("{}ms", value_ms)))
    }

    /// Chart history URL for the selected entity, or the overall series.
    pub fn daily_url(&self, selected: Option<&str>) -> Option<String> {
        match selected {
            Some(id) => self
                .endpoints
                .daily_entity
                .as_ref()
                .map(|template| template.replace("{id}", &id.to_lowercase())),
            None => self.endpoints.daily.clone(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_id_property() -> String {
    "state".to_string()
}

fn default_label_property() -> String {
    "name".to_string()
}

fn default_property() -> String {
    "positive".to_string()
}

fn default_max_selected_properties() -> usize {
    3
}

fn default_highlight_color() -> String {
    "#fff65a".to_string()
}

fn default_colors() -> HashMap<String, String> {
    [
        ("death", "#000000"),
        ("totalTestResults", "#49b9ff"),
        ("positive", "#ff33aa"),
        ("negative", "#ffaa33"),
        ("recovered", "#93efad"),
        ("hospitalizedCurrently", "#22ad99"),
        ("inIcuCurrently", "#bb5bff"),
        ("onVentilatorCurrently", "#ffaacc"),
    ]
    .into_iter()
    .map(|(key, color)| (key.to_string(), color.to_string()))
    .collect()
}

fn default_bbox() -> BoundingBox {
    BoundingBox::new(144.7694, -13.80, -66.949895, 71.352561)
}

pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(config::Environment::with_prefix("DASHBOARD").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
