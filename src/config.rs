use anyhow::{Context, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::info;

pub struct Config {
    /// Base URL of the notes backend, also used to build file URLs.
    pub api_url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub session_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            api_url: try_load::<String>("NOTENEST_API_URL", "http://localhost:3000")?
                .trim_end_matches('/')
                .to_string(),
            port: try_load("NOTENEST_PORT", "3000")?,
            data_dir: try_load("NOTENEST_DATA_DIR", ".")?,
            session_file: try_load("NOTENEST_SESSION_FILE", ".session")?,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}
