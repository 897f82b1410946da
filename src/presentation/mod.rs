// Presentation layer - HTTP adapter over the window service
pub mod app_state;
pub mod handlers;
