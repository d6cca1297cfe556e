//! Secure content serving for extracted package trees.
//!
//! Path rejection and missing files are indistinguishable to the caller
//! (both 404) so probing cannot reveal which paths exist. Every proxied
//! response denies cross-origin framing: this content is only ever rendered
//! inside the controlled player iframe.

use std::collections::HashMap;
use std::io;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use crate::config::Config;
use crate::error::AppError;
use crate::storage::{sanitize_relative_path, ContentStore};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Resolve the Cache-Control value for a MIME type: exact match first, then
/// the longest matching `type/*` wildcard, then the `default` rule. A
/// configured `None` suppresses the header rather than falling through.
pub fn resolve_cache_control(
    rules: &HashMap<String, Option<String>>,
    content_type: &str,
) -> Option<String> {
    if let Some(value) = rules.get(content_type) {
        return value.clone();
    }

    let best_wildcard = rules
        .iter()
        .filter(|(pattern, _)| {
            pattern.ends_with("/*") && content_type.starts_with(&pattern[..pattern.len() - 1])
        })
        .max_by_key(|(pattern, _)| pattern.len());
    if let Some((_, value)) = best_wildcard {
        return value.clone();
    }

    rules.get("default").cloned().flatten()
}

pub fn content_type_for(path: &str) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Serve one file from `{content_base}/{raw_path}` through the store.
pub async fn serve_content(
    store: &dyn ContentStore,
    config: &Config,
    content_base: &str,
    raw_path: &str,
) -> Result<Response, AppError> {
    // Rejection folds into NotFound deliberately.
    let normalized = sanitize_relative_path(raw_path).ok_or(AppError::NotFound)?;
    let storage_path = format!("{}/{}", content_base.trim_end_matches('/'), normalized);
    let content_type = content_type_for(&normalized);
    let cache_control = resolve_cache_control(&config.cache_control, content_type);

    if config.redirect_media
        && (content_type.starts_with("audio/") || content_type.starts_with("video/"))
    {
        return match store.url(&storage_path) {
            Ok(url) => {
                let mut response = Redirect::to(&url).into_response();
                apply_cache_header(&mut response, cache_control.as_deref());
                Ok(response)
            }
            // An explicit security refusal propagates; any other URL
            // resolution failure is a generic not-found.
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(AppError::Forbidden(e.to_string()))
            }
            Err(_) => Err(AppError::NotFound),
        };
    }

    let bytes = match store.open(&storage_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AppError::NotFound),
        Err(e) => return Err(AppError::Internal(e.to_string())),
    };

    let mut response = (StatusCode::OK, bytes).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    apply_security_headers(&mut response);
    apply_cache_header(&mut response, cache_control.as_deref());
    Ok(response)
}

fn apply_security_headers(response: &mut Response) {
    response.headers_mut().insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("SAMEORIGIN"),
    );
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("frame-ancestors 'self'"),
    );
}

fn apply_cache_header(response: &mut Response, cache_control: Option<&str>) {
    if let Some(value) = cache_control {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// Store whose media URLs resolve to a fixed CDN address, or fail in a
    /// configurable way.
    struct UrlStore {
        url_error: Option<io::ErrorKind>,
    }

    #[async_trait]
    impl ContentStore for UrlStore {
        async fn open(&self, _path: &str) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
        async fn save(&self, _path: &str, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        async fn delete(&self, _path: &str) -> io::Result<()> {
            Ok(())
        }
        async fn exists(&self, _path: &str) -> bool {
            false
        }
        async fn list_files(&self, _prefix: &str) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn url(&self, path: &str) -> io::Result<String> {
            match self.url_error {
                None => Ok(format!("https://cdn.example.com/{path}")),
                Some(kind) => Err(io::Error::new(kind, "refused")),
            }
        }
    }

    fn media_config() -> Config {
        let mut config = Config::from_env();
        config.redirect_media = true;
        config
    }

    #[tokio::test]
    async fn media_redirects_to_backend_url() {
        let store = UrlStore { url_error: None };
        let response = serve_content(&store, &media_config(), "h5p_content", "pkg/clip.mp4")
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://cdn.example.com/h5p_content/pkg/clip.mp4"
        );
    }

    #[tokio::test]
    async fn media_redirect_security_error_propagates() {
        let store = UrlStore {
            url_error: Some(io::ErrorKind::PermissionDenied),
        };
        let err = serve_content(&store, &media_config(), "h5p_content", "pkg/clip.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn media_redirect_resolution_failure_is_not_found() {
        let store = UrlStore {
            url_error: Some(io::ErrorKind::Unsupported),
        };
        let err = serve_content(&store, &media_config(), "h5p_content", "pkg/clip.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn non_media_is_proxied_even_in_redirect_mode() {
        let store = UrlStore { url_error: None };
        let err = serve_content(&store, &media_config(), "h5p_content", "pkg/index.html")
            .await
            .unwrap_err();
        // open() reports missing: the HTML request never took the redirect
        // branch.
        assert!(matches!(err, AppError::NotFound));
    }

    fn rules(entries: &[(&str, Option<&str>)]) -> HashMap<String, Option<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn exact_match_wins_over_wildcard() {
        let rules = rules(&[
            ("video/mp4", Some("max-age=1")),
            ("video/*", Some("max-age=2")),
        ]);
        assert_eq!(
            resolve_cache_control(&rules, "video/mp4").as_deref(),
            Some("max-age=1")
        );
    }

    #[test]
    fn longest_wildcard_wins() {
        let rules = rules(&[
            ("application/*", Some("short")),
            ("application/vnd.custom/*", Some("long")),
        ]);
        assert_eq!(
            resolve_cache_control(&rules, "application/vnd.custom/thing").as_deref(),
            Some("long")
        );
    }

    #[test]
    fn falls_back_to_default() {
        let rules = rules(&[("default", Some("no-cache"))]);
        assert_eq!(
            resolve_cache_control(&rules, "text/html").as_deref(),
            Some("no-cache")
        );
    }

    #[test]
    fn configured_none_suppresses_header() {
        let rules = rules(&[("image/*", None), ("default", Some("no-cache"))]);
        // image/* is configured as "no header": it must not fall through to
        // the default.
        assert_eq!(resolve_cache_control(&rules, "image/png"), None);
    }

    #[test]
    fn no_rules_means_no_header() {
        assert_eq!(resolve_cache_control(&HashMap::new(), "text/html"), None);
    }

    #[test]
    fn content_type_defaults_to_octet_stream() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("launchdata.unknownext"), DEFAULT_CONTENT_TYPE);
    }
}
