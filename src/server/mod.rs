//! HTTP server for the ops API.

mod app;
mod state;

pub use app::create_app;
pub use state::AppState;
