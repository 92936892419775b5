use std::path::PathBuf;
use std::sync::Arc;

use parley_db::Database;
use parley_gateway::Dispatcher;

use crate::link_preview::{self, PreviewCache};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub upload_dir: PathBuf,
    pub story_ttl: chrono::Duration,
    pub http: reqwest::Client,
    pub previews: PreviewCache,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        jwt_secret: String,
        dispatcher: Dispatcher,
        upload_dir: PathBuf,
        story_ttl: chrono::Duration,
    ) -> anyhow::Result<Self> {
        let http = link_preview::http_client()?;

        Ok(Self {
            db,
            jwt_secret,
            dispatcher,
            upload_dir,
            story_ttl,
            http,
            previews: PreviewCache::default(),
        })
    }
}
