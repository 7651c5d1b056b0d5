// Dashboard service - composes datasets, view state and the map zoom hook
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::application::dataset_repository::{DatasetRepository, FetchError};
use crate::application::hook_registry::{ZoomHooks, ZOOM_TO_HOOK};
use crate::application::refresh_scheduler::{RefreshState, RefreshTick};
use crate::application::request_coordinator::{CancelSlot, RequestCoordinator, RequestFuture, RequestState};
use crate::application::widget_events::{self, WidgetEvent};
use crate::domain::dashboard::{
    Bar, ChartView, Counter, DashboardView, DataStatus, DatasetStatus, LiveText, MapCircle, MapView, Swatch, TableRow,
};
use crate::domain::dataset::{self, project_record, record_id, scale_linear, sort_entities, sort_records, Record};
use crate::domain::geometry::{extent_of, format_bbox_string, Extent, GeometryError, ViewportProjection, ZoomRequest};
use crate::domain::legend::{legend_markers, LEGEND_CLASSES};
use crate::domain::view_state::{decode, has_properties, SortOrder, ViewState};
use crate::infrastructure::config::{DashboardConfig, EndpointConfig};

pub const TABLE_BAR_RANGE: (f64, f64) = (4.0, 200.0);
pub const MAP_RADIUS_RANGE: (f64, f64) = (2.0, 50.0);
const DEFAULT_BAR_COLOR: &str = "#333333";
const DATE_KEY: &str = "date";

/// Identifier and extent of one vector layer feature.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeature {
    pub id: Option<String>,
    pub extent: Option<Extent>,
}

#[derive(Debug)]
pub enum RenderOutcome {
    /// The location was missing defaults; render this one instead.
    Redirect(String),
    View(Box<DashboardView>),
}

type RecordsCoordinator<D> = RequestCoordinator<D, Vec<Record>>;
type LayerCoordinator = RequestCoordinator<(), Vec<LayerFeature>>;

/// Owns every remote dataset of one dashboard session and turns a location
/// into the view the widgets draw.
pub struct DashboardService {
    config: Arc<DashboardConfig>,
    repository: Arc<dyn DatasetRepository>,
    hooks: Arc<ZoomHooks>,
    projection: Arc<dyn ViewportProjection>,
    refresh: watch::Receiver<RefreshState>,
    info: RecordsCoordinator<()>,
    current: RecordsCoordinator<RefreshTick>,
    daily: RecordsCoordinator<Option<String>>,
    polygons: LayerCoordinator,
    centroids: LayerCoordinator,
    last_view: Mutex<Option<ViewState>>,
    last_zoom: Mutex<Option<Extent>>,
}

impl DashboardService {
    pub fn new(
        config: Arc<DashboardConfig>,
        repository: Arc<dyn DatasetRepository>,
        hooks: Arc<ZoomHooks>,
        projection: Arc<dyn ViewportProjection>,
        refresh: watch::Receiver<RefreshState>,
    ) -> Self {
        Self {
            config,
            repository,
            hooks,
            projection,
            refresh,
            info: RequestCoordinator::new("info"),
            current: RequestCoordinator::with_callbacks(
                "current",
                |records: &Vec<Record>| tracing::info!("Loaded {} current records", records.len()),
                |error: &FetchError| tracing::debug!("Keeping previous current records after: {}", error),
            ),
            daily: RequestCoordinator::new("daily"),
            polygons: RequestCoordinator::new("polygon layer"),
            centroids: RequestCoordinator::new("centroid layer"),
            last_view: Mutex::new(None),
            last_zoom: Mutex::new(None),
        }
    }

    /// Fetches the static datasets once and the live dataset for the
    /// current refresh state.
    pub fn start(&self) {
        let endpoints = &self.config.endpoints;
        self.info.watch(
            (),
            || true,
            self.records_request(endpoints.info.url.clone(), endpoint_keys(&endpoints.info)),
        );
        self.polygons
            .watch((), || true, self.features_request(self.config.vector_layers.polygon.clone()));
        self.centroids
            .watch((), || true, self.features_request(self.config.vector_layers.centroid.clone()));

        let state = self.refresh.borrow().clone();
        self.refresh_current(&state);
    }

    /// Re-fetches the live dataset when the refresh tick moved on.
    ///
    /// While ticking, the tick that resets the counter to zero is skipped:
    /// the timer fires right after it anyway.
    pub fn refresh_current(&self, state: &RefreshState) {
        let current = &self.config.endpoints.current;
        self.current.watch(
            state.tick,
            || !state.is_ticking() || state.tick.count > 0,
            self.records_request(current.url.clone(), endpoint_keys(current)),
        );
    }

    /// Follows the refresh scheduler until it goes away or the service is
    /// dropped.
    pub fn spawn_refresh_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        let mut refresh = self.refresh.clone();
        tokio::spawn(async move {
            while refresh.changed().await.is_ok() {
                let Some(service) = service.upgrade() else {
                    break;
                };
                let state = refresh.borrow_and_update().clone();
                service.refresh_current(&state);
            }
            tracing::debug!("Refresh sync stopped");
        })
    }

    /// Re-evaluates the zoom target of the last rendered view whenever a
    /// vector layer settles, so a selection rendered before the layers
    /// arrived still zooms.
    pub fn spawn_zoom_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        let mut polygons = self.polygons.subscribe();
        let mut centroids = self.centroids.subscribe();
        tokio::spawn(async move {
            loop {
                let changed = tokio::select! {
                    changed = polygons.changed() => changed,
                    changed = centroids.changed() => changed,
                };
                if changed.is_err() {
                    break;
                }
                let Some(service) = service.upgrade() else {
                    break;
                };
                let last_view = service.last_view.lock().unwrap_or_else(PoisonError::into_inner).clone();
                if let Some(state) = last_view {
                    service.update_zoom(&state);
                }
            }
            tracing::debug!("Zoom sync stopped");
        })
    }

    /// Decodes `location`, heals missing defaults and builds the view.
    pub fn render(&self, location: &str) -> RenderOutcome {
        let query = decode(location);
        let mut state = ViewState::from_query(&query, &self.config.default_property);

        let mut healed = !has_properties(&query);
        if !self.is_valid_sort(state.sort.as_deref()) {
            let (sort, order) = self.default_sort(&state);
            state.sort = Some(sort);
            state.order = Some(order);
            healed = true;
        }
        if healed {
            let healed_location = state.location();
            tracing::warn!("Healing dashboard location {:?} to {:?}", location, healed_location);
            return RenderOutcome::Redirect(healed_location);
        }

        let daily_url = self.config.daily_url(state.selected.as_deref());
        let has_daily = daily_url.is_some();
        self.daily.watch(
            state.selected.clone(),
            || has_daily,
            self.daily_request(daily_url.unwrap_or_default()),
        );
        *self.last_view.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        self.update_zoom(&state);

        RenderOutcome::View(Box::new(self.build_view(&state)))
    }

    /// Applies a widget event to `location` and returns the new location.
    pub fn apply_event(&self, location: &str, event: WidgetEvent) -> Result<String, GeometryError> {
        let config = &self.config;
        let mut state = ViewState::from_query(&decode(location), &config.default_property);
        match event {
            WidgetEvent::ToggleProperty { key } => {
                if config.metric_keys().contains(&key) {
                    widget_events::toggle_property(&mut state, &key, config.max_selected_properties);
                } else {
                    tracing::warn!("Ignoring toggle of unknown metric {}", key);
                }
            }
            WidgetEvent::SelectEntity { id } => widget_events::select_entity(&mut state, &id),
            WidgetEvent::Sort { key } => widget_events::sort_by(&mut state, &key, &config.id_property),
            WidgetEvent::MapMoved { bounds, crs } => {
                state.bbox = Some(format_bbox_string(&bounds, &crs, self.projection.as_ref())?);
            }
            WidgetEvent::ZoomAll => {
                let target = Extent::Bounds(config.bbox);
                *self.last_zoom.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
                self.hooks.invoke(ZOOM_TO_HOOK, &ZoomRequest::new(target));
            }
        }
        Ok(state.location())
    }

    /// Cancels every in-flight request; later responses are ignored.
    pub fn shutdown(&self) {
        self.info.teardown();
        self.current.teardown();
        self.daily.teardown();
        self.polygons.teardown();
        self.centroids.teardown();
    }

    fn is_valid_sort(&self, sort: Option<&str>) -> bool {
        match sort {
            Some(key) => key == self.config.id_property || self.config.metric_keys().iter().any(|k| k == key),
            None => false,
        }
    }

    fn default_sort(&self, state: &ViewState) -> (String, SortOrder) {
        state
            .properties
            .iter()
            .find(|key| self.is_valid_sort(Some(key.as_str())))
            .map(|key| (key.clone(), SortOrder::Descending))
            .unwrap_or_else(|| (self.config.id_property.clone(), SortOrder::Ascending))
    }

    fn records_request(
        &self,
        url: String,
        keys: Vec<String>,
    ) -> impl FnOnce(&mut CancelSlot) -> RequestFuture<Vec<Record>> + use<> {
        let repository = Arc::clone(&self.repository);
        move |slot: &mut CancelSlot| -> RequestFuture<Vec<Record>> {
            abortable(slot, async move {
                let records = repository.fetch_records(&url).await?;
                Ok::<_, FetchError>(records.iter().map(|record| project_record(record, &keys)).collect())
            })
        }
    }

    fn daily_request(&self, url: String) -> impl FnOnce(&mut CancelSlot) -> RequestFuture<Vec<Record>> + use<> {
        let repository = Arc::clone(&self.repository);
        move |slot: &mut CancelSlot| -> RequestFuture<Vec<Record>> {
            abortable(slot, async move {
                let mut records = repository.fetch_records(&url).await?;
                sort_records(&mut records, DATE_KEY, SortOrder::Ascending);
                Ok::<_, FetchError>(records)
            })
        }
    }

    fn features_request(
        &self,
        url: String,
    ) -> impl FnOnce(&mut CancelSlot) -> RequestFuture<Vec<LayerFeature>> + use<> {
        let repository = Arc::clone(&self.repository);
        let id_property = self.config.id_property.clone();
        move |slot: &mut CancelSlot| -> RequestFuture<Vec<LayerFeature>> {
            abortable(slot, async move {
                let features = repository.fetch_features(&url).await?;
                let layer = features
                    .iter()
                    .map(|feature| LayerFeature {
                        id: record_id(&feature.properties, &id_property),
                        extent: feature.geometry.as_ref().and_then(extent_of),
                    })
                    .collect();
                Ok::<_, FetchError>(layer)
            })
        }
    }

    fn update_zoom(&self, state: &ViewState) {
        let Some(target) = self.zoom_target(state) else {
            return;
        };
        {
            let mut last_zoom = self.last_zoom.lock().unwrap_or_else(PoisonError::into_inner);
            if last_zoom.as_ref() == Some(&target) {
                return;
            }
            *last_zoom = Some(target);
        }
        tracing::debug!("Zooming map to {:?}", target);
        self.hooks.invoke(ZOOM_TO_HOOK, &ZoomRequest::new(target));
    }

    /// Polygon extent of the selection, else its centroid, else the `bbox`
    /// override, else the configured extent. `None` while the layers that
    /// could resolve a selection are still loading.
    fn zoom_target(&self, state: &ViewState) -> Option<Extent> {
        let fallback = Extent::Bounds(state.extent_override().unwrap_or(self.config.bbox));
        let Some(selected) = state.selected.as_deref() else {
            return Some(fallback);
        };

        let polygons = self.polygons.snapshot();
        let centroids = self.centroids.snapshot();
        if !is_settled(&polygons) || !is_settled(&centroids) {
            return None;
        }
        let find = |layer: &RequestState<Vec<LayerFeature>>| {
            layer
                .response
                .iter()
                .flatten()
                .find(|feature| feature.id.as_deref() == Some(selected))
                .and_then(|feature| feature.extent)
        };
        Some(find(&polygons).or_else(|| find(&centroids)).unwrap_or(fallback))
    }

    fn build_view(&self, state: &ViewState) -> DashboardView {
        let config = &self.config;
        let info = self.info.snapshot();
        let current = self.current.snapshot();
        let daily = self.daily.snapshot();

        let current_records = current.response.as_deref().unwrap_or_default();
        let mut entities = dataset::join(
            info.response.as_deref().unwrap_or_default(),
            current_records,
            &config.id_property,
        );
        let totals = dataset::totals(current_records, config.metric_keys());
        let domain = dataset::domain(&entities, &state.properties);
        if let Some(sort) = &state.sort {
            sort_entities(&mut entities, sort, state.effective_order());
        }

        let bar_scale = scale_linear(domain, TABLE_BAR_RANGE);
        let rows = entities
            .iter()
            .map(|entity| {
                let id = entity.id(&config.id_property);
                TableRow {
                    selected: id.is_some() && id == state.selected,
                    id,
                    label: entity
                        .fields
                        .get(&config.label_property)
                        .and_then(|label| label.as_str())
                        .map(str::to_string),
                    values: entity.fields.clone(),
                    bars: state
                        .properties
                        .iter()
                        .filter_map(|key| {
                            bar_scale.finite(entity.value(key)).map(|size| Bar {
                                key: key.clone(),
                                size,
                                fill: config.color(key).unwrap_or_else(|| DEFAULT_BAR_COLOR.to_string()),
                            })
                        })
                        .collect(),
                }
            })
            .collect();

        let counters = config
            .metric_keys()
            .iter()
            .map(|key| {
                let selected = state.properties.contains(key);
                Counter {
                    key: key.clone(),
                    count: totals.get(key).unwrap_or(0.0),
                    color: config.color(key),
                    selected,
                    enabled: selected || state.properties.len() < config.max_selected_properties,
                }
            })
            .collect();

        let radius_scale = scale_linear(domain, MAP_RADIUS_RANGE);
        let mut circles: Vec<MapCircle> = entities
            .iter()
            .filter_map(|entity| entity.id(&config.id_property).map(|id| (id, entity)))
            .flat_map(|(id, entity)| {
                state.properties.iter().map(move |key| MapCircle {
                    id: id.clone(),
                    property: key.clone(),
                    radius: radius_scale.finite(entity.value(key)).unwrap_or(0.0),
                    color: config.color(key),
                })
            })
            .collect();
        // Largest first so small circles stay clickable on top.
        circles.sort_by(|a, b| b.radius.total_cmp(&a.radius));

        let map = MapView {
            circles,
            highlighted: state.selected.clone(),
            highlight_color: config.highlight_color.clone(),
            legend: legend_markers(domain, MAP_RADIUS_RANGE, LEGEND_CLASSES),
            swatches: state
                .properties
                .iter()
                .map(|key| Swatch {
                    property: key.clone(),
                    color: config.color(key),
                })
                .collect(),
        };

        let chart_keys: Vec<String> = std::iter::once(DATE_KEY.to_string())
            .chain(state.properties.iter().cloned())
            .collect();
        // Without a history source for this selection, whatever was loaded
        // belongs to another selection.
        let chart = if config.daily_url(state.selected.as_deref()).is_some() {
            ChartView {
                pending: daily.pending,
                error: daily.error.as_ref().map(ToString::to_string),
                series: daily
                    .response
                    .iter()
                    .flatten()
                    .map(|record| project_record(record, &chart_keys))
                    .collect(),
            }
        } else {
            ChartView::default()
        };

        let live_text = LiveText::from_totals(
            self.refresh.borrow().date,
            totals.get(&config.live_text.confirmed_property),
            totals.get(&config.live_text.deaths_property),
        );

        let polygons = self.polygons.snapshot();
        let centroids = self.centroids.snapshot();
        let status = DataStatus {
            info: dataset_status(&info),
            current: dataset_status(&current),
            layers: DatasetStatus {
                pending: polygons.pending || centroids.pending,
                error: polygons.error.or(centroids.error).map(|error| error.to_string()),
            },
        };

        DashboardView {
            properties: state.properties.clone(),
            selected: state.selected.clone(),
            sort: state.sort.clone(),
            order: state.effective_order(),
            pending: info.pending || current.pending,
            status,
            totals,
            domain,
            counters,
            rows,
            map,
            chart,
            live_text,
        }
    }
}

fn endpoint_keys(endpoint: &EndpointConfig) -> Vec<String> {
    endpoint
        .properties_keys
        .iter()
        .chain(endpoint.count_keys.iter())
        .cloned()
        .collect()
}

fn is_settled<T>(state: &RequestState<T>) -> bool {
    state.sequence > 0 && !state.pending
}

fn dataset_status<T>(state: &RequestState<T>) -> DatasetStatus {
    DatasetStatus {
        pending: state.pending,
        error: state.error.as_ref().map(ToString::to_string),
    }
}

/// Runs `fetch` on its own task so cancelling aborts the transport; an
/// aborted fetch settles as [`FetchError::Cancelled`].
fn abortable<T, F>(slot: &mut CancelSlot, fetch: F) -> RequestFuture<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    let task = tokio::spawn(fetch);
    let abort = task.abort_handle();
    slot.register(move || abort.abort());
    Box::pin(async move {
        match task.await {
            Ok(result) => result,
            Err(error) if error.is_cancelled() => Err(FetchError::Cancelled),
            Err(error) => Err(FetchError::Transport(error.to_string())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::application::refresh_scheduler::{RefreshInterval, RefreshScheduler};
    use crate::domain::geometry::{BoundingBox, Feature};
    use crate::infrastructure::config::{EndpointsConfig, VectorLayersConfig};
    use crate::infrastructure::projection::WebMercatorProjection;

    #[derive(Default)]
    struct FakeRepository {
        records: HashMap<String, Result<Vec<Record>, FetchError>>,
        features: HashMap<String, Vec<Feature>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRepository {
        fn with_records(mut self, url: &str, records: Value) -> Self {
            self.records.insert(url.to_string(), Ok(serde_json::from_value(records).unwrap()));
            self
        }

        fn with_error(mut self, url: &str, error: FetchError) -> Self {
            self.records.insert(url.to_string(), Err(error));
            self
        }

        fn with_features(mut self, url: &str, collection: Value) -> Self {
            let features: Vec<Feature> = serde_json::from_value(collection["features"].clone()).unwrap();
            self.features.insert(url.to_string(), features);
            self
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|call| call.as_str() == url).count()
        }
    }

    #[async_trait]
    impl DatasetRepository for FakeRepository {
        async fn fetch_records(&self, url: &str) -> Result<Vec<Record>, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.records.get(url).cloned().unwrap_or(Ok(Vec::new()))
        }

        async fn fetch_features(&self, url: &str) -> Result<Vec<Feature>, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            Ok(self.features.get(url).cloned().unwrap_or_default())
        }
    }

    fn test_config() -> DashboardConfig {
        let defaults = EndpointsConfig::default();
        DashboardConfig {
            endpoints: EndpointsConfig {
                info: EndpointConfig {
                    url: "info".to_string(),
                    ..defaults.info
                },
                current: EndpointConfig {
                    url: "current".to_string(),
                    ..defaults.current
                },
                daily: Some("daily".to_string()),
                daily_entity: Some("daily/{id}".to_string()),
            },
            vector_layers: VectorLayersConfig {
                polygon: "polygons".to_string(),
                centroid: "centroids".to_string(),
            },
            ..DashboardConfig::default()
        }
    }

    struct Harness {
        service: Arc<DashboardService>,
        repository: Arc<FakeRepository>,
        scheduler: RefreshScheduler,
        zooms: Arc<Mutex<Vec<ZoomRequest>>>,
        zoom_sync: JoinHandle<()>,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.zoom_sync.abort();
        }
    }

    fn harness(repository: FakeRepository) -> Harness {
        harness_with(test_config(), repository)
    }

    fn harness_with(config: DashboardConfig, repository: FakeRepository) -> Harness {
        let repository = Arc::new(repository);
        let scheduler = RefreshScheduler::new();
        let hooks = Arc::new(ZoomHooks::new());
        let zooms = Arc::new(Mutex::new(Vec::new()));
        let sink = zooms.clone();
        hooks.register(ZOOM_TO_HOOK, move |request: &ZoomRequest| sink.lock().unwrap().push(request.clone()));

        let service = Arc::new(DashboardService::new(
            Arc::new(config),
            repository.clone(),
            hooks,
            Arc::new(WebMercatorProjection),
            scheduler.subscribe(),
        ));
        let zoom_sync = service.spawn_zoom_sync();
        Harness {
            service,
            repository,
            scheduler,
            zooms,
            zoom_sync,
        }
    }

    async fn wait_for_zooms(harness: &Harness, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while harness.zooms.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("zoomed in time");
    }

    fn layer(geometry: Value) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "properties": { "state": "AK" }, "geometry": geometry }]
        })
    }

    async fn settle<D, T>(coordinator: &RequestCoordinator<D, T>, sequence: u64)
    where
        D: PartialEq + Send + 'static,
        T: Send + Sync + 'static,
    {
        let mut state = coordinator.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| state.sequence >= sequence && !state.pending),
        )
        .await
        .expect("settled in time")
        .expect("coordinator alive");
    }

    async fn started(harness: &Harness) {
        harness.service.start();
        settle(&harness.service.info, 1).await;
        settle(&harness.service.current, 1).await;
        settle(&harness.service.polygons, 1).await;
        settle(&harness.service.centroids, 1).await;
    }

    fn view(outcome: RenderOutcome) -> DashboardView {
        match outcome {
            RenderOutcome::View(view) => *view,
            RenderOutcome::Redirect(location) => panic!("unexpected redirect to {}", location),
        }
    }

    fn alaska() -> FakeRepository {
        FakeRepository::default()
            .with_records("info", json!([{ "state": "AK", "name": "Alaska" }]))
            .with_records("current", json!([{ "state": "AK", "positive": 319 }]))
    }

    #[tokio::test]
    async fn test_missing_properties_redirects_with_defaults() {
        let harness = harness(FakeRepository::default());
        match harness.service.render("") {
            RenderOutcome::Redirect(location) => {
                assert_eq!(location, "?order=des&properties=positive&sort=positive")
            }
            RenderOutcome::View(_) => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn test_invalid_sort_is_replaced() {
        let harness = harness(FakeRepository::default());
        match harness.service.render("?properties=death%2Cpositive&sort=bogus&theme=dark") {
            RenderOutcome::Redirect(location) => assert_eq!(
                location,
                "?order=des&properties=death%2Cpositive&sort=death&theme=dark"
            ),
            RenderOutcome::View(_) => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn test_sort_outside_current_properties_stays_valid() {
        let harness = harness(alaska());
        started(&harness).await;
        let view = view(harness.service.render("?order=asc&properties=positive&sort=recovered"));
        assert_eq!(view.sort.as_deref(), Some("recovered"));
        assert_eq!(view.order, SortOrder::Ascending);
    }

    #[tokio::test]
    async fn test_single_entity_view() {
        let harness = harness(alaska());
        started(&harness).await;

        let view = view(harness.service.render("?order=des&properties=positive&sort=positive"));
        assert!(!view.pending);
        assert_eq!(view.totals.get("positive"), Some(319.0));
        assert_eq!(view.totals.get("death"), Some(0.0));
        assert_eq!((view.domain.min, view.domain.max), (319.0, 319.0));

        assert_eq!(view.rows.len(), 1);
        let row = &view.rows[0];
        assert_eq!(row.id.as_deref(), Some("AK"));
        assert_eq!(row.label.as_deref(), Some("Alaska"));
        assert_eq!(
            row.bars,
            vec![Bar {
                key: "positive".to_string(),
                size: 102.0,
                fill: "#ff33aa".to_string(),
            }]
        );

        assert_eq!(
            view.map.circles,
            vec![MapCircle {
                id: "AK".to_string(),
                property: "positive".to_string(),
                radius: 26.0,
                color: Some("#ff33aa".to_string()),
            }]
        );

        let positive = view.counters.iter().find(|c| c.key == "positive").unwrap();
        assert!(positive.selected && positive.enabled);
        assert_eq!(view.counters.len(), 8);
        // Nothing ticked yet.
        assert!(view.live_text.is_none());
    }

    #[tokio::test]
    async fn test_rows_follow_sort_order() {
        let repository = FakeRepository::default().with_records(
            "current",
            json!([
                { "state": "NY", "positive": 10 },
                { "state": "AK", "positive": 300 },
                { "state": "CA" },
            ]),
        );
        let harness = harness(repository);
        started(&harness).await;

        let ids = |view: &DashboardView| -> Vec<String> { view.rows.iter().filter_map(|row| row.id.clone()).collect() };
        let sorted = view(harness.service.render("?order=des&properties=positive&sort=positive"));
        assert_eq!(ids(&sorted), vec!["AK", "NY", "CA"]);
        // Missing value: no bar, zero radius.
        assert!(sorted.rows[2].bars.is_empty());
        assert_eq!(sorted.map.circles.last().map(|c| c.radius), Some(0.0));

        let by_id = view(harness.service.render("?order=asc&properties=positive&sort=state"));
        assert_eq!(ids(&by_id), vec!["AK", "CA", "NY"]);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_view_usable() {
        let repository = FakeRepository::default()
            .with_records("info", json!([{ "state": "AK", "name": "Alaska" }]))
            .with_error("current", FetchError::Status(503));
        let harness = harness(repository);
        started(&harness).await;

        let view = view(harness.service.render("?order=des&properties=positive&sort=positive"));
        assert_eq!(view.status.current.error.as_deref(), Some("server responded with status 503"));
        assert!(view.status.info.error.is_none());
        assert!(view.rows.is_empty());
        assert_eq!(view.totals.get("positive"), Some(0.0));
    }

    #[tokio::test]
    async fn test_selection_zooms_to_polygon_extent_once() {
        let repository = alaska().with_features(
            "polygons",
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": { "state": "AK" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[160, 40], [-160, 40], [-160, -40], [160, -40], [160, 40]]]
                    }
                }]
            }),
        );
        let harness = harness(repository);
        started(&harness).await;

        let location = "?order=des&properties=positive&selected=AK&sort=positive";
        let selected = view(harness.service.render(location));
        assert!(selected.rows[0].selected);
        assert_eq!(selected.map.highlighted.as_deref(), Some("AK"));
        harness.service.render(location);

        let zooms = harness.zooms.lock().unwrap().clone();
        assert_eq!(zooms.len(), 1);
        assert_eq!(zooms[0].extent, Extent::Bounds(BoundingBox::new(160.0, -40.0, -160.0, 40.0)));
        assert_eq!(zooms[0].fit_extent, Some(BoundingBox::new(-200.0, -40.0, -160.0, 40.0)));
        assert_eq!(zooms[0].max_zoom, 6);
    }

    #[tokio::test]
    async fn test_selection_rendered_before_layers_zooms_once_loaded() {
        let repository = alaska()
            .with_features(
                "polygons",
                layer(json!({ "type": "Polygon", "coordinates": [[[-170, 52], [-130, 52], [-130, 71], [-170, 71], [-170, 52]]] })),
            )
            .with_features("centroids", layer(json!({ "type": "Point", "coordinates": [-150.0, 64.0] })));
        let harness = harness(repository);
        harness.service.start();

        harness
            .service
            .render("?order=des&properties=positive&selected=AK&sort=positive");
        assert!(harness.zooms.lock().unwrap().is_empty());

        settle(&harness.service.polygons, 1).await;
        settle(&harness.service.centroids, 1).await;
        wait_for_zooms(&harness, 1).await;

        let zooms = harness.zooms.lock().unwrap().clone();
        assert_eq!(zooms.len(), 1);
        assert_eq!(zooms[0].extent, Extent::Bounds(BoundingBox::new(-170.0, 52.0, -130.0, 71.0)));
    }

    #[tokio::test]
    async fn test_selection_falls_back_to_centroid() {
        let repository =
            alaska().with_features("centroids", layer(json!({ "type": "Point", "coordinates": [-150.0, 64.0] })));
        let harness = harness(repository);
        started(&harness).await;

        harness
            .service
            .render("?bbox=-10%2C-20%2C10%2C20&order=des&properties=positive&selected=AK&sort=positive");

        let zooms = harness.zooms.lock().unwrap().clone();
        assert_eq!(zooms.len(), 1);
        assert_eq!(zooms[0].extent, Extent::Point([-150.0, 64.0]));
        assert_eq!(zooms[0].fit_extent, None);
    }

    #[tokio::test]
    async fn test_zoom_falls_back_to_override_then_default() {
        let harness = harness(alaska());
        started(&harness).await;

        harness
            .service
            .render("?bbox=-10%2C-20%2C10%2C20&order=des&properties=positive&selected=AK&sort=positive");
        harness.service.render("?order=des&properties=positive&sort=positive");
        harness.service.apply_event("?order=des&properties=positive&sort=positive", WidgetEvent::ZoomAll).unwrap();

        let extents: Vec<Extent> = harness.zooms.lock().unwrap().iter().map(|zoom| zoom.extent).collect();
        let default_bbox = Extent::Bounds(test_config().bbox);
        assert_eq!(
            extents,
            vec![
                Extent::Bounds(BoundingBox::new(-10.0, -20.0, 10.0, 20.0)),
                default_bbox,
                default_bbox,
            ]
        );
    }

    #[tokio::test]
    async fn test_chart_follows_selection() {
        let repository = alaska()
            .with_records(
                "daily/ak",
                json!([
                    { "date": 20200402, "positive": 20, "hash": "b" },
                    { "date": 20200401, "positive": 10, "hash": "a" },
                ]),
            )
            .with_records("daily", json!([{ "date": 20200401, "positive": 99 }]));
        let harness = harness(repository);
        started(&harness).await;

        harness
            .service
            .render("?order=des&properties=positive&selected=AK&sort=positive");
        settle(&harness.service.daily, 1).await;
        let chart = view(harness.service.render("?order=des&properties=positive&selected=AK&sort=positive")).chart;
        assert_eq!(
            Value::Array(chart.series.into_iter().map(Value::Object).collect()),
            json!([
                { "date": 20200401, "positive": 10 },
                { "date": 20200402, "positive": 20 },
            ])
        );

        harness.service.render("?order=des&properties=positive&sort=positive");
        settle(&harness.service.daily, 2).await;
        assert_eq!(harness.repository.calls_to("daily"), 1);
        assert_eq!(harness.repository.calls_to("daily/ak"), 1);
    }

    #[tokio::test]
    async fn test_chart_cleared_without_history_source() {
        let mut config = test_config();
        config.endpoints.daily = None;
        let repository = alaska().with_records("daily/ak", json!([{ "date": 20200401, "positive": 10 }]));
        let harness = harness_with(config, repository);
        started(&harness).await;

        harness
            .service
            .render("?order=des&properties=positive&selected=AK&sort=positive");
        settle(&harness.service.daily, 1).await;
        let selected = view(harness.service.render("?order=des&properties=positive&selected=AK&sort=positive"));
        assert_eq!(selected.chart.series.len(), 1);

        let cleared = view(harness.service.render("?order=des&properties=positive&sort=positive"));
        assert!(cleared.chart.series.is_empty());
        assert!(!cleared.chart.pending);
        assert_eq!(harness.service.daily.snapshot().sequence, 1);
    }

    #[tokio::test]
    async fn test_widget_events() {
        let harness = harness(FakeRepository::default());
        let location = "?order=des&properties=positive&sort=positive";

        let toggled = harness
            .service
            .apply_event(location, WidgetEvent::ToggleProperty { key: "death".to_string() })
            .unwrap();
        assert_eq!(toggled, "?order=des&properties=positive%2Cdeath&sort=positive");
        let ignored = harness
            .service
            .apply_event(location, WidgetEvent::ToggleProperty { key: "bogus".to_string() })
            .unwrap();
        assert_eq!(ignored, location);

        let sorted = harness
            .service
            .apply_event(location, WidgetEvent::Sort { key: "positive".to_string() })
            .unwrap();
        assert_eq!(sorted, "?order=asc&properties=positive&sort=positive");

        let moved = harness
            .service
            .apply_event(
                location,
                WidgetEvent::MapMoved {
                    bounds: BoundingBox::new(-200.0, -90.0, -175.0, 90.0),
                    crs: "EPSG:4326".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            decode(&moved).get("bbox").map(String::as_str),
            Some("-180.0000,-90.0000,-175.0000,90.0000,160.0000,-90.0000,180.0000,90.0000")
        );

        let unsupported = harness.service.apply_event(
            location,
            WidgetEvent::MapMoved {
                bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                crs: "EPSG:27700".to_string(),
            },
        );
        assert!(unsupported.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_ticks_drive_current_fetches() {
        let harness = harness(alaska());
        started(&harness).await;
        assert_eq!(harness.repository.calls_to("current"), 1);

        // Counter reset on selection does not fetch; the immediate tick does.
        harness.scheduler.select_interval(RefreshInterval::new(1000, "1s"));
        harness.service.refresh_current(&harness.scheduler.snapshot());
        assert_eq!(harness.service.current.snapshot().sequence, 1);

        let sync = harness.service.spawn_refresh_sync();
        settle(&harness.service.current, 2).await;
        assert_eq!(harness.repository.calls_to("current"), 2);

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle(&harness.service.current, 3).await;
        assert_eq!(harness.repository.calls_to("current"), 3);

        let view = view(harness.service.render("?order=des&properties=positive&sort=positive"));
        assert!(view.live_text.is_none());
        sync.abort();
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_requests() {
        let harness = harness(alaska());
        harness.service.shutdown();
        harness.service.start();
        assert_eq!(harness.service.info.snapshot().sequence, 0);
    }
}
