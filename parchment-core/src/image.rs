//! C11 — Image URL validator. Add-time HEAD validation of external image
//! URLs, embedding the bytes as a `data:` URI so later renders are
//! offline-safe.

use std::time::Duration;

use base64::Engine;
use url::Url;

use crate::config::DocConfig;
use crate::error::{DocError, DocResult};

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

pub struct ImageValidator {
    client: reqwest::Client,
    require_https: bool,
    max_size_bytes: u64,
    timeout: Duration,
}

impl ImageValidator {
    pub fn new(config: &DocConfig) -> Self {
        ImageValidator {
            client: reqwest::Client::new(),
            require_https: config.image_require_https,
            max_size_bytes: config.image_max_size_bytes(),
            timeout: config.image_validation_timeout,
        }
    }

    fn content_type_allowed(content_type: &str) -> Option<&'static str> {
        let bare = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        ALLOWED_CONTENT_TYPES.iter().find(|ct| **ct == bare).copied()
    }

    /// Validate and fetch the image, returning a `data:<mime>;base64,...`
    /// URI ready to embed in a fragment instance.
    pub async fn validate_and_embed(&self, image_url: &str, require_https_override: Option<bool>) -> DocResult<String> {
        let require_https = require_https_override.unwrap_or(self.require_https);

        let parsed = Url::parse(image_url)
            .map_err(|_| DocError::InvalidImageUrl(format!("'{image_url}' is not a well-formed URL")))?;

        match parsed.scheme() {
            "https" => {}
            "http" if !require_https => {}
            "http" => {
                return Err(DocError::InvalidImageUrl("Non-HTTPS URL with require_https=true".into()));
            }
            other => {
                return Err(DocError::InvalidImageUrl(format!("Unsupported URL scheme '{other}'")));
            }
        }

        let head = tokio::time::timeout(
            self.timeout,
            self.client.head(parsed.clone()).send(),
        )
        .await
        .map_err(|_| DocError::ImageUrlTimeout)?
        .map_err(|e| {
            if e.is_timeout() {
                DocError::ImageUrlTimeout
            } else {
                DocError::ImageValidationError(e.to_string())
            }
        })?;

        if !head.status().is_success() {
            return Err(DocError::ImageUrlNotAccessible(head.status().as_u16()));
        }

        let content_type = head
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let mime = Self::content_type_allowed(&content_type)
            .ok_or_else(|| DocError::InvalidImageContentType(content_type.clone()))?;

        if let Some(len) = head.content_length() {
            if len > self.max_size_bytes {
                return Err(DocError::ImageTooLarge(len));
            }
        }

        let response = tokio::time::timeout(self.timeout, self.client.get(parsed).send())
            .await
            .map_err(|_| DocError::ImageUrlTimeout)?
            .map_err(|e| DocError::ImageValidationError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DocError::ImageUrlNotAccessible(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocError::ImageValidationError(e.to_string()))?;
        if bytes.len() as u64 > self.max_size_bytes {
            return Err(DocError::ImageTooLarge(bytes.len() as u64));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(format!("data:{mime};base64,{encoded}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DocConfig {
        DocConfig {
            data_dir: "./data".into(),
            templates_dir: "./templates".into(),
            styles_dir: "./styles".into(),
            fragments_dir: "./fragments".into(),
            images_dir: "./images".into(),
            max_storage_mb: 1024,
            housekeeping_interval_mins: 60,
            housekeeper_lock_stale_seconds: 3600,
            image_max_size_mb: 10,
            image_validation_timeout: Duration::from_secs(10),
            image_require_https: true,
        }
    }

    #[tokio::test]
    async fn non_https_is_rejected_by_default() {
        let validator = ImageValidator::new(&test_config());
        let err = validator.validate_and_embed("http://example.com/img.png", None).await.unwrap_err();
        match err {
            DocError::InvalidImageUrl(reason) => assert!(reason.contains("Non-HTTPS")),
            other => panic!("expected InvalidImageUrl, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let validator = ImageValidator::new(&test_config());
        let err = validator.validate_and_embed("not a url", None).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_IMAGE_URL");
    }

    #[test]
    fn content_type_strips_parameters() {
        assert_eq!(ImageValidator::content_type_allowed("image/png; charset=binary"), Some("image/png"));
        assert_eq!(ImageValidator::content_type_allowed("application/pdf"), None);
    }
}
