// Application state for HTTP handlers
use std::sync::Arc;

use tokio::sync::watch;

use crate::application::dashboard_service::DashboardService;
use crate::application::refresh_scheduler::RefreshScheduler;
use crate::domain::geometry::ZoomRequest;
use crate::infrastructure::config::DashboardConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DashboardConfig>,
    pub dashboard: Arc<DashboardService>,
    pub scheduler: Arc<RefreshScheduler>,
    /// Last request passed to the zoom hook, for the map widget to poll.
    pub zoom: watch::Receiver<Option<ZoomRequest>>,
}
