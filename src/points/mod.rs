pub mod badges;
mod dto;
pub mod handlers;
pub mod repo;
pub mod rules;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
