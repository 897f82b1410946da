// Application state for HTTP handlers
use crate::application::window_service::WindowService;

pub struct AppState {
    pub window_service: WindowService,
}
