//! Read-only operator views.
//!
//! - `GET /dead-letters` – events that exhausted their re-delivery budget

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use subcoord_core::intake::DeadLetter;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub(super) struct DeadLetterView {
    transaction_id: String,
    event: &'static str,
    source: String,
    attempts: u32,
    error: String,
    recorded_at: i64,
}

impl From<DeadLetter> for DeadLetterView {
    fn from(letter: DeadLetter) -> Self {
        Self {
            transaction_id: letter.event.transaction_id.to_string(),
            event: letter.event.event.kind(),
            source: letter.event.source.to_string(),
            attempts: letter.attempts,
            error: letter.error,
            recorded_at: letter.recorded_at.unix_timestamp(),
        }
    }
}

/// `GET /dead-letters`: oldest first, for manual reconciliation.
pub(super) async fn list_dead_letters(State(state): State<AppState>) -> impl IntoResponse {
    let letters: Vec<DeadLetterView> = state
        .intake()
        .dead_letters()
        .into_iter()
        .map(DeadLetterView::from)
        .collect();
    Json(letters)
}
