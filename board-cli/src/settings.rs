use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use board_client::{BoardOptions, SupabaseConfig};

#[derive(Debug, Clone)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub posts_table: String,
    pub image_bucket: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let supabase_url = get_required("SUPABASE_URL").context("SUPABASE_URL is required")?;
        let supabase_anon_key =
            get_required("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY is required")?;

        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(anyhow!("SUPABASE_URL must start with http:// or https://"));
        }

        let posts_table = std::env::var("BOARD_POSTS_TABLE")
            .unwrap_or_else(|_| SupabaseConfig::DEFAULT_POSTS_TABLE.to_string());
        let image_bucket = std::env::var("BOARD_IMAGE_BUCKET")
            .unwrap_or_else(|_| SupabaseConfig::DEFAULT_IMAGE_BUCKET.to_string());
        let log_level = std::env::var("LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "warn".to_string());
        let page_size = parse_u32_env("BOARD_PAGE_SIZE", BoardOptions::DEFAULT_PAGE_SIZE)?;
        let request_timeout_secs = parse_u64_env("BOARD_REQUEST_TIMEOUT_SECS", 15)?;
        let connect_timeout_secs = parse_u64_env("BOARD_CONNECT_TIMEOUT_SECS", 5)?;

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            posts_table,
            image_bucket,
            page_size,
            request_timeout_secs,
            connect_timeout_secs,
            log_level,
        })
    }

    pub fn supabase_config(&self) -> SupabaseConfig {
        let mut config = SupabaseConfig::new(&self.supabase_url, &self.supabase_anon_key);
        config.posts_table = self.posts_table.clone();
        config.image_bucket = self.image_bucket.clone();
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }

    pub fn board_options(&self) -> BoardOptions {
        BoardOptions::new(
            self.page_size,
            Duration::from_secs(self.request_timeout_secs),
        )
    }
}

fn get_required(key: &str) -> Result<String> {
    let value = std::env::var(key)?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(anyhow!("{key} must not be empty"));
    }
    Ok(value)
}

fn parse_u32_env(key: &str, default: u32) -> Result<u32> {
    parse_positive(key, std::env::var(key).ok(), default)
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64> {
    parse_positive(key, std::env::var(key).ok(), default)
}

fn parse_positive<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr + PartialEq + From<u8> + ToString,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = raw
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<T>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == T::from(0) {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}
