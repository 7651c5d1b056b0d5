// HTTP request handlers
use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::application::dashboard_service::RenderOutcome;
use crate::application::refresh_scheduler::{RefreshInterval, RefreshState};
use crate::application::widget_events::WidgetEvent;
use crate::domain::geometry::ZoomRequest;
use crate::presentation::app_state::AppState;

pub const DASHBOARD_PATH: &str = "/dashboard";

#[derive(Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub location: String,
    pub event: WidgetEvent,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub location: String,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub state: RefreshState,
    pub intervals: Vec<RefreshInterval>,
}

#[derive(Deserialize)]
pub struct SelectIntervalRequest {
    pub value_ms: u64,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Dashboard view for the location in the query string. Redirects when the
/// location had to be completed with defaults.
pub async fn get_dashboard(RawQuery(query): RawQuery, State(state): State<Arc<AppState>>) -> Response {
    let location = query.map(|q| format!("?{}", q)).unwrap_or_default();
    match state.dashboard.render(&location) {
        RenderOutcome::Redirect(healed) => Redirect::temporary(&format!("{}{}", DASHBOARD_PATH, healed)).into_response(),
        RenderOutcome::View(view) => Json(view).into_response(),
    }
}

/// Applies a widget event and answers with the location to navigate to
pub async fn post_event(State(state): State<Arc<AppState>>, Json(request): Json<EventRequest>) -> Response {
    match state.dashboard.apply_event(&request.location, request.event) {
        Ok(location) => Json(EventResponse { location }).into_response(),
        Err(e) => {
            tracing::warn!("Rejected widget event: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

pub async fn get_refresh(State(state): State<Arc<AppState>>) -> Json<RefreshResponse> {
    Json(RefreshResponse {
        state: state.scheduler.snapshot(),
        intervals: state.config.refresh.intervals.clone(),
    })
}

pub async fn put_refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectIntervalRequest>,
) -> Json<RefreshState> {
    state
        .scheduler
        .select_interval(state.config.refresh_interval(request.value_ms));
    Json(state.scheduler.snapshot())
}

/// Latest map zoom request, if any
pub async fn get_zoom(State(state): State<Arc<AppState>>) -> Json<Option<ZoomRequest>> {
    Json(state.zoom.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::header::LOCATION;
    use tokio::sync::watch;

    use crate::application::dashboard_service::DashboardService;
    use crate::application::dataset_repository::{DatasetRepository, FetchError};
    use crate::application::hook_registry::ZoomHooks;
    use crate::application::refresh_scheduler::RefreshScheduler;
    use crate::domain::dataset::Record;
    use crate::domain::geometry::{BoundingBox, Feature};
    use crate::infrastructure::config::DashboardConfig;
    use crate::infrastructure::projection::WebMercatorProjection;

    struct EmptyRepository;

    #[async_trait]
    impl DatasetRepository for EmptyRepository {
        async fn fetch_records(&self, _url: &str) -> Result<Vec<Record>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_features(&self, _url: &str) -> Result<Vec<Feature>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn app_state() -> Arc<AppState> {
        let config = Arc::new(DashboardConfig::default());
        let scheduler = Arc::new(RefreshScheduler::new());
        let dashboard = Arc::new(DashboardService::new(
            config.clone(),
            Arc::new(EmptyRepository),
            Arc::new(ZoomHooks::new()),
            Arc::new(WebMercatorProjection),
            scheduler.subscribe(),
        ));
        let (_, zoom) = watch::channel(None);
        Arc::new(AppState {
            config,
            dashboard,
            scheduler,
            zoom,
        })
    }

    #[tokio::test]
    async fn test_dashboard_redirects_to_healed_location() {
        let response = get_dashboard(RawQuery(None), State(app_state())).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/dashboard?order=des&properties=positive&sort=positive")
        );
    }

    #[tokio::test]
    async fn test_dashboard_view() {
        let query = Some("order=des&properties=positive&sort=positive".to_string());
        let response = get_dashboard(RawQuery(query), State(app_state())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_event_with_unknown_crs_is_bad_request() {
        let request = EventRequest {
            location: "?properties=positive".to_string(),
            event: WidgetEvent::MapMoved {
                bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                crs: "EPSG:27700".to_string(),
            },
        };
        let response = post_event(State(app_state()), Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_put_refresh_selects_interval() {
        let state = app_state();
        let Json(refresh) = put_refresh(State(state.clone()), Json(SelectIntervalRequest { value_ms: 0 })).await;
        assert!(!refresh.is_ticking());
        assert_eq!(refresh.interval.map(|interval| interval.label).as_deref(), Some("never"));

        let Json(listed) = get_refresh(State(state)).await;
        assert_eq!(listed.intervals.len(), 4);
        assert_eq!(listed.state.tick.generation, 1);
    }
}
