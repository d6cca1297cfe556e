use std::collections::HashMap;
use std::env;

/// Storage prefix for extracted SCORM content.
pub const DEFAULT_SCORM_CONTENT_PATH: &str = "scorm_content";
/// Storage prefix for extracted H5P content.
pub const DEFAULT_H5P_CONTENT_PATH: &str = "h5p_content";
/// Storage prefix for uploaded SCORM archives.
pub const DEFAULT_SCORM_UPLOAD_PATH: &str = "scorm_packages";
/// Storage prefix for uploaded .h5p archives.
pub const DEFAULT_H5P_UPLOAD_PATH: &str = "h5p_packages";

/// Retry policy for writes hitting the backend's coarse write lock.
/// SCORM content issues many rapid API calls, so contention is expected
/// under SQLite-style locking.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 50,
            backoff_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Root directory of the filesystem content store.
    pub content_root: String,
    pub scorm_content_path: String,
    pub h5p_content_path: String,
    pub scorm_upload_path: String,
    pub h5p_upload_path: String,
    /// Enroll users on first SCORM launch instead of requiring an explicit
    /// enrollment action.
    pub auto_enroll: bool,
    /// Redirect audio/video requests to a storage-native URL instead of
    /// proxying bytes.
    pub redirect_media: bool,
    /// Cache-Control rules keyed by exact MIME type, `type/*` wildcard, or
    /// the literal `default`. A `None` value suppresses the header.
    pub cache_control: HashMap<String, Option<String>>,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://lms.db?mode=rwc".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8081);
        let rust_log =
            env::var("RUST_LOG").unwrap_or_else(|_| "lms_runtime=info,axum=info".into());
        let content_root = env::var("CONTENT_ROOT").unwrap_or_else(|_| "./content".into());
        let auto_enroll = env::var("LMS_AUTO_ENROLL")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let redirect_media = env::var("LMS_REDIRECT_MEDIA")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            database_url,
            port,
            rust_log,
            content_root,
            scorm_content_path: DEFAULT_SCORM_CONTENT_PATH.into(),
            h5p_content_path: DEFAULT_H5P_CONTENT_PATH.into(),
            scorm_upload_path: DEFAULT_SCORM_UPLOAD_PATH.into(),
            h5p_upload_path: DEFAULT_H5P_UPLOAD_PATH.into(),
            auto_enroll,
            redirect_media,
            cache_control: default_cache_control(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Default caching rules: long-lived for media, short for images, no caching
/// for everything else so runtime-tracked HTML is always fresh.
pub fn default_cache_control() -> HashMap<String, Option<String>> {
    let mut rules = HashMap::new();
    rules.insert("audio/*".to_string(), Some("public, max-age=86400".into()));
    rules.insert("video/*".to_string(), Some("public, max-age=86400".into()));
    rules.insert("image/*".to_string(), Some("public, max-age=3600".into()));
    rules.insert("default".to_string(), Some("no-cache".into()));
    rules
}
