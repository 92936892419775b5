use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use parley_db::Database;

/// Background task that deletes expired stories and their views.
pub async fn run_story_purge(db: Arc<Database>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.purge_expired_stories(&Utc::now())).await {
            Ok(Ok(count)) if count > 0 => info!("Purged {} expired stories", count),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Story purge failed: {:#}", e),
            Err(e) => warn!("Story purge task panicked: {}", e),
        }
    }
}
