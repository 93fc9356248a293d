use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use kindred_core::Settings;
use kindred_core::notify::DEFAULT_EXPO_PUSH_URL;

/// Secrets that ship in sample files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "",
    "dev-secret-change-me",
    "changeme",
    "secret",
    "your-jwt-secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub push_enabled: bool,
    pub expo_push_url: String,
    pub expo_access_token: Option<String>,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("KINDRED_JWT_SECRET").context("KINDRED_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("KINDRED_JWT_SECRET is a placeholder value");
        }

        let db_path = PathBuf::from(get("KINDRED_DB_PATH").unwrap_or_else(|| "kindred.db".into()));
        let host = get("KINDRED_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("KINDRED_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("KINDRED_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let push_enabled = match get("KINDRED_PUSH_ENABLED") {
            Some(raw) => parse_bool(&raw).context("KINDRED_PUSH_ENABLED must be true or false")?,
            None => true,
        };
        let expo_push_url =
            get("KINDRED_EXPO_PUSH_URL").unwrap_or_else(|| DEFAULT_EXPO_PUSH_URL.into());
        let expo_access_token = get("KINDRED_EXPO_ACCESS_TOKEN").filter(|t| !t.trim().is_empty());

        let mut settings = Settings::default();
        if let Some(raw) = get("KINDRED_PROXIMITY_RADIUS_M") {
            let radius: f64 = raw.parse().context("KINDRED_PROXIMITY_RADIUS_M must be a number")?;
            if !radius.is_finite() || radius <= 0.0 {
                bail!("KINDRED_PROXIMITY_RADIUS_M must be positive");
            }
            settings.proximity_radius_m = radius;
        }
        if let Some(raw) = get("KINDRED_ENCOUNTER_COOLDOWN_SECS") {
            let secs: u64 = raw
                .parse()
                .context("KINDRED_ENCOUNTER_COOLDOWN_SECS must be a whole number of seconds")?;
            settings.encounter_cooldown = Duration::from_secs(secs);
        }

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            push_enabled,
            expo_push_url,
            expo_access_token,
            settings,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
