pub mod handlers;
pub mod models;
pub mod relay;
pub mod routes;
pub mod validate;

use tera::Tera;

use crate::web::relay::Relay;

/// Shared, read-only server state.
pub struct AppState {
    pub tera: Tera,
    pub relay: Relay,
}
