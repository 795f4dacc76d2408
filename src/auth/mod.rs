use crate::state::AppState;
use axum::Router;

mod claims;
pub mod dto;
pub mod extractors;
mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

pub use extractors::authenticate;

/// Public account routes: registration, login, refresh and password reset.
pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
