use axum::routing::{get, post};
use axum::Router;

use crate::health::health_check;
use crate::state::AppState;

pub mod handlers;


/// Routes of the relay: `/health` always, the webhook ingress when the
/// state carries a push ingress
pub fn relay_router(state: AppState, webhook_path: &str) -> Router {
    let mut router = Router::new().route("/health", get(health_check));

    if state.ingress.is_some() {
        router = router.route(webhook_path, post(handlers::ingress::handle_webhook));
    }

    router.with_state(state)
}
