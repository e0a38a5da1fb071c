pub mod beam_search;
pub mod health;
pub mod images;
pub mod services;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(beam_search::router())
        .merge(images::router())
        .merge(services::router())
        .merge(ws::router())
}
