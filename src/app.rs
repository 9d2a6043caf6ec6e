pub mod model;
pub mod rate_limit;
pub mod routes;

pub use routes::{AppState, router};
