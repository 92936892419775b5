use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used outside debug builds.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEFAULT_STORY_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub story_ttl: chrono::Duration,
}

impl Config {
    /// Read `PARLEY_*` variables from the environment (after `.env`).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = get("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("PARLEY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLEY_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let jwt_secret = get("PARLEY_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if !cfg!(debug_assertions)
            && (jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()))
        {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let story_ttl_hours = match get("PARLEY_STORY_TTL_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|h| *h > 0)
                .context("PARLEY_STORY_TTL_HOURS must be a positive number of hours")?,
            None => DEFAULT_STORY_TTL_HOURS,
        };

        Ok(Self {
            addr,
            db_path: get("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            upload_dir: get("PARLEY_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            story_ttl: chrono::Duration::hours(story_ttl_hours),
        })
    }
}
