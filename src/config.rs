use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./biolink.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when composing page URLs, e.g. "https://bio.example.com"
    /// Must NOT have a trailing slash.
    pub base_url: String,

    /// How many A/B tests may run concurrently across all links.
    /// The free tier caps this at 1.
    pub free_tier_test_cap: i64,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let free_tier_test_cap = std::env::var("FREE_TIER_TEST_CAP")
            .unwrap_or_else(|_| "1".into())
            .parse::<i64>()
            .unwrap_or(1);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./biolink.db".into()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            free_tier_test_cap,
        })
    }
}
