// Application state for HTTP handlers
use crate::application::trend_service::TrendService;

pub struct AppState {
    pub trend_service: TrendService,
}
