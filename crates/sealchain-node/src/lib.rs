pub mod api;
pub mod constants;

pub use api::{router, AppState};
