//! Uniform domain error type, surfaced by every component and mapped to the
//! wire shape `{status, error_code, message, recovery_strategy, details}`
//! at the dispatcher/HTTP boundary.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum DocError {
    // authentication
    AuthRequired,
    AuthFailed(String),
    // input / validation
    InvalidArguments(String),
    ValidationError(Vec<ValidationIssue>),
    InvalidGlobalParameters(Vec<ValidationIssue>),
    InvalidFragmentParameters(Vec<ValidationIssue>),
    InvalidPosition(String),
    InvalidAlias(String),
    AliasInUse(String),
    // resource
    TemplateNotFound(String),
    FragmentNotFound(String),
    StyleNotFound(String),
    SessionNotFound,
    NotFound(String),
    // state
    SessionNotReady,
    InvalidSessionState(String),
    // rendering
    RenderFailed(String),
    // image
    InvalidImageUrl(String),
    ImageUrlNotAccessible(u16),
    InvalidImageContentType(String),
    ImageTooLarge(u64),
    ImageUrlTimeout,
    ImageValidationError(String),
    // registry
    GroupMismatch {
        item_id: String,
        expected: String,
        actual: String,
    },
    LoadError(String),
    // storage
    DiskFull,
    CorruptMetadata(String),
    // server
    InternalError(String),
}

/// One actionable validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub parameter_name: String,
    pub expected_type: String,
    pub received_type: String,
    pub message: String,
    #[serde(default)]
    pub suggested_examples: Vec<Value>,
}

impl DocError {
    pub fn error_code(&self) -> &'static str {
        use DocError::*;
        match self {
            AuthRequired => "AUTH_REQUIRED",
            AuthFailed(_) => "AUTH_FAILED",
            InvalidArguments(_) => "INVALID_ARGUMENTS",
            ValidationError(_) => "VALIDATION_ERROR",
            InvalidGlobalParameters(_) => "INVALID_GLOBAL_PARAMETERS",
            InvalidFragmentParameters(_) => "INVALID_FRAGMENT_PARAMETERS",
            InvalidPosition(_) => "INVALID_POSITION",
            InvalidAlias(_) => "INVALID_ALIAS",
            AliasInUse(_) => "ALIAS_IN_USE",
            TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            FragmentNotFound(_) => "FRAGMENT_NOT_FOUND",
            StyleNotFound(_) => "STYLE_NOT_FOUND",
            SessionNotFound => "SESSION_NOT_FOUND",
            NotFound(_) => "NOT_FOUND",
            SessionNotReady => "SESSION_NOT_READY",
            InvalidSessionState(_) => "INVALID_SESSION_STATE",
            RenderFailed(_) => "RENDER_FAILED",
            InvalidImageUrl(_) => "INVALID_IMAGE_URL",
            ImageUrlNotAccessible(_) => "IMAGE_URL_NOT_ACCESSIBLE",
            InvalidImageContentType(_) => "INVALID_IMAGE_CONTENT_TYPE",
            ImageTooLarge(_) => "IMAGE_TOO_LARGE",
            ImageUrlTimeout => "IMAGE_URL_TIMEOUT",
            ImageValidationError(_) => "IMAGE_VALIDATION_ERROR",
            GroupMismatch { .. } => "GROUP_MISMATCH",
            LoadError(_) => "LOAD_ERROR",
            DiskFull => "DISK_FULL",
            CorruptMetadata(_) => "CORRUPT_METADATA",
            InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn message(&self) -> String {
        use DocError::*;
        match self {
            AuthRequired => "A bearer token is required for this operation".to_string(),
            AuthFailed(msg) => format!("Token verification failed: {msg}"),
            InvalidArguments(msg) => msg.clone(),
            ValidationError(_) => "One or more parameters failed validation".to_string(),
            InvalidGlobalParameters(_) => "Global parameters failed validation".to_string(),
            InvalidFragmentParameters(_) => "Fragment parameters failed validation".to_string(),
            InvalidPosition(anchor) => format!("Unknown position anchor: {anchor}"),
            InvalidAlias(alias) => format!("Alias '{alias}' does not match ^[A-Za-z0-9_-]{{3,64}}$"),
            AliasInUse(alias) => format!("Alias '{alias}' is already in use in this group"),
            TemplateNotFound(id) => format!("Template '{id}' was not found"),
            FragmentNotFound(id) => format!("Fragment '{id}' was not found"),
            StyleNotFound(id) => format!("Style '{id}' was not found"),
            SessionNotFound => "Session was not found".to_string(),
            NotFound(what) => format!("{what} was not found"),
            SessionNotReady => "Session has no global parameters set yet".to_string(),
            InvalidSessionState(msg) => msg.clone(),
            RenderFailed(msg) => format!("Rendering failed: {msg}"),
            InvalidImageUrl(reason) => reason.clone(),
            ImageUrlNotAccessible(status) => format!("Image URL returned HTTP {status}"),
            InvalidImageContentType(ct) => format!("Unsupported image content type: {ct}"),
            ImageTooLarge(size) => format!("Image exceeds the maximum allowed size ({size} bytes)"),
            ImageUrlTimeout => "Image URL validation timed out".to_string(),
            ImageValidationError(msg) => format!("Image validation failed: {msg}"),
            GroupMismatch { item_id, expected, actual } => format!(
                "Item '{item_id}' declares group '{actual}' but lives under directory group '{expected}'"
            ),
            LoadError(msg) => format!("Failed to load registry item: {msg}"),
            DiskFull => "Storage backend is out of disk space".to_string(),
            CorruptMetadata(detail) => format!("Metadata index was corrupt and has been reconciled: {detail}"),
            InternalError(_) => "An internal error occurred".to_string(),
        }
    }

    pub fn recovery_strategy(&self) -> &'static str {
        use DocError::*;
        match self {
            AuthRequired => "Provide a bearer token via auth_token, token, or the Authorization header",
            AuthFailed(_) => "Obtain a fresh token and retry",
            InvalidArguments(_) | ValidationError(_) | InvalidGlobalParameters(_)
            | InvalidFragmentParameters(_) => "Fix the reported parameters and retry",
            InvalidPosition(_) => "Use start, end, before:<guid>, or after:<guid> with a known instance guid",
            InvalidAlias(_) => "Choose an alias matching ^[A-Za-z0-9_-]{3,64}$",
            AliasInUse(_) => "Choose a different alias or resolve the existing session",
            TemplateNotFound(_) | FragmentNotFound(_) | StyleNotFound(_) => "Call the corresponding list operation to discover valid ids",
            SessionNotFound => "Verify the session id/alias and the caller's group",
            NotFound(_) => "Verify the identifier and retry",
            SessionNotReady => "Call set_global_parameters before rendering",
            InvalidSessionState(_) => "Inspect session status before retrying",
            RenderFailed(_) => "Check the template and fragment content for errors and retry",
            InvalidImageUrl(_) => "Use a well-formed https:// image URL",
            ImageUrlNotAccessible(_) => "Verify the URL is publicly reachable and returns 200",
            InvalidImageContentType(_) => "Link directly to a png, jpeg, gif, webp, or svg asset",
            ImageTooLarge(_) => "Use a smaller image or raise GOFR_DOC_IMAGE_MAX_SIZE_MB",
            ImageUrlTimeout => "Retry, or raise GOFR_DOC_IMAGE_VALIDATION_TIMEOUT",
            ImageValidationError(_) => "Retry; if it persists, verify network connectivity to the host",
            GroupMismatch { .. } => "Fix the directory layout or the item's declared group",
            LoadError(_) => "Inspect server startup logs for the offending item",
            DiskFull => "Free disk space or raise the configured storage threshold",
            CorruptMetadata(_) => "The index was regenerated from a filesystem scan; re-run any failed listing",
            InternalError(_) => "Retry; if it persists, contact the operator with the correlation id",
        }
    }

    pub fn details(&self) -> Value {
        use DocError::*;
        match self {
            ValidationError(issues) | InvalidGlobalParameters(issues) | InvalidFragmentParameters(issues) => {
                serde_json::json!({ "errors": issues })
            }
            ImageUrlNotAccessible(status) => serde_json::json!({ "status": status }),
            InvalidImageContentType(ct) => serde_json::json!({ "content_type": ct }),
            ImageTooLarge(size) => serde_json::json!({ "size_bytes": size }),
            GroupMismatch { item_id, expected, actual } => {
                serde_json::json!({ "item_id": item_id, "expected_group": expected, "actual_group": actual })
            }
            InternalError(correlation_id) => serde_json::json!({ "correlation_id": correlation_id }),
            _ => Value::Null,
        }
    }

    /// HTTP status code this error kind maps to, per spec §7/§8.
    pub fn status_code(&self) -> u16 {
        use DocError::*;
        match self {
            AuthRequired | AuthFailed(_) => 401,
            InvalidArguments(_) | ValidationError(_) | InvalidGlobalParameters(_)
            | InvalidFragmentParameters(_) | InvalidPosition(_) | InvalidAlias(_)
            | InvalidImageUrl(_) | InvalidImageContentType(_) | ImageTooLarge(_) => 400,
            AliasInUse(_) => 409,
            TemplateNotFound(_) | FragmentNotFound(_) | StyleNotFound(_) | SessionNotFound
            | NotFound(_) => 404,
            SessionNotReady | InvalidSessionState(_) => 409,
            RenderFailed(_) => 500,
            ImageUrlNotAccessible(_) | ImageUrlTimeout | ImageValidationError(_) => 502,
            GroupMismatch { .. } | LoadError(_) => 500,
            DiskFull | CorruptMetadata(_) | InternalError(_) => 500,
        }
    }

    /// Build the uniform error-response JSON body described in spec §7.
    pub fn to_response_body(&self) -> Value {
        serde_json::json!({
            "status": "error",
            "error_code": self.error_code(),
            "message": self.message(),
            "recovery_strategy": self.recovery_strategy(),
            "details": self.details(),
        })
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(correlation_id = %correlation_id, error = %err, "internal error");
        DocError::InternalError(correlation_id)
    }
}

impl std::fmt::Display for DocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for DocError {}

impl From<std::io::Error> for DocError {
    fn from(err: std::io::Error) -> Self {
        DocError::internal(err)
    }
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::internal(err)
    }
}

pub type DocResult<T> = Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_never_leaks_group() {
        let err = DocError::SessionNotFound;
        let body = err.to_response_body();
        assert_eq!(body["error_code"], "SESSION_NOT_FOUND");
        assert_eq!(body["details"], Value::Null);
    }

    #[test]
    fn group_mismatch_carries_ids() {
        let err = DocError::GroupMismatch {
            item_id: "invoice".into(),
            expected: "public".into(),
            actual: "research".into(),
        };
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.details()["item_id"], "invoice");
    }

    #[test]
    fn image_too_large_status_is_bad_request() {
        assert_eq!(DocError::ImageTooLarge(11_000_000).status_code(), 400);
    }
}
