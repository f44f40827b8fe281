pub mod middleware;
pub mod query;
pub mod repository;
mod routes;
pub mod widget;

pub use routes::get_router;

/// Where the autocomplete endpoint is mounted. Registered widgets are bound
/// to this path and requests on any other path are refused.
pub const AUTO_RESPONSE_PATH: &str = "/api/fields/auto.json";
