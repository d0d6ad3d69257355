use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::state::AppState;

/// Background task that drops expired and revoked sessions.
pub async fn run_session_cleanup(state: AppState, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match state.blocking(|db| db.purge_sessions(Utc::now())).await {
            Ok(0) => {}
            Ok(count) => info!("Cleanup: purged {} dead sessions", count),
            Err(e) => warn!("Cleanup error: {}", e),
        }
    }
}
