use crate::state::AppState;
use axum::Router;

pub mod delivery;
mod dto;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reset_token;
pub mod secret;
pub mod services;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
