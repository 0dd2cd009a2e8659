//! Literal-env-var configuration, per spec §6. Loaded once at startup and
//! threaded explicitly into `ServerComponents` — no global mutable config.

use std::path::PathBuf;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct DocConfig {
    pub data_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub styles_dir: PathBuf,
    pub fragments_dir: PathBuf,
    pub images_dir: PathBuf,
    pub max_storage_mb: u64,
    pub housekeeping_interval_mins: u64,
    pub housekeeper_lock_stale_seconds: u64,
    pub image_max_size_mb: u64,
    pub image_validation_timeout: Duration,
    pub image_require_https: bool,
}

impl DocConfig {
    /// Load configuration from the environment, loading a `.env` file
    /// first if present (mirrors `r2e-core`'s config loading order).
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        DocConfig {
            data_dir: PathBuf::from(env_string("GOFR_DOC_DATA_DIR", "./data")),
            templates_dir: PathBuf::from(env_string("GOFR_DOC_TEMPLATES_DIR", "./templates")),
            styles_dir: PathBuf::from(env_string("GOFR_DOC_STYLES_DIR", "./styles")),
            fragments_dir: PathBuf::from(env_string("GOFR_DOC_FRAGMENTS_DIR", "./fragments")),
            images_dir: PathBuf::from(env_string("GOFR_DOC_IMAGES_DIR", "./images")),
            max_storage_mb: env_u64("GOFR_DOC_MAX_STORAGE_MB", 1024),
            housekeeping_interval_mins: env_u64("GOFR_DOC_HOUSEKEEPING_INTERVAL_MINS", 60),
            housekeeper_lock_stale_seconds: env_u64("GOFR_DOC_HOUSEKEEPER_LOCK_STALE_SECONDS", 3600),
            image_max_size_mb: env_u64("GOFR_DOC_IMAGE_MAX_SIZE_MB", 10),
            image_validation_timeout: Duration::from_secs(env_u64(
                "GOFR_DOC_IMAGE_VALIDATION_TIMEOUT",
                10,
            )),
            image_require_https: env_bool("GOFR_DOC_IMAGE_REQUIRE_HTTPS", true),
        }
    }

    pub fn max_storage_bytes(&self) -> u64 {
        self.max_storage_mb * 1024 * 1024
    }

    pub fn image_max_size_bytes(&self) -> u64 {
        self.image_max_size_mb * 1024 * 1024
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.data_dir.join("auth")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.data_dir.join("proxy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Clear any leaked vars from other tests in this process.
        for key in [
            "GOFR_DOC_DATA_DIR",
            "GOFR_DOC_MAX_STORAGE_MB",
            "GOFR_DOC_IMAGE_REQUIRE_HTTPS",
        ] {
            std::env::remove_var(key);
        }
        let cfg = DocConfig::from_env();
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.max_storage_mb, 1024);
        assert!(cfg.image_require_https);
    }
}
