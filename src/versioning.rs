//! API version resolution (spec §6 "Versioning").
//!
//! Precedence: path prefix > `API-Version` header > `Accept` header >
//! `version` query parameter. Responses always echo `API-Version`,
//! `API-Current-Version`, `API-Supported-Versions`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::Config;

/// `Accept: application/vnd.fashion-api.v{N}+json`.
fn parse_accept_version(accept: &str) -> Option<u32> {
    let marker = "vnd.fashion-api.v";
    let start = accept.find(marker)? + marker.len();
    let rest = &accept[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Extract a leading `/api/v{N}/...` prefix, if present.
pub fn parse_path_version(path: &str) -> Option<u32> {
    let rest = path.strip_prefix("/api/v")?;
    let end = rest.find('/').unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Path,
    Header,
    Accept,
    Query,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedVersion {
    pub version: u32,
    pub source: VersionSource,
}

/// Resolve the requested API version per the precedence order. Falls back
/// to `default_version` when nothing is specified.
pub fn resolve_version(
    path: &str,
    headers: &HeaderMap,
    query_version: Option<&str>,
    default_version: u32,
) -> ResolvedVersion {
    if let Some(v) = parse_path_version(path) {
        return ResolvedVersion { version: v, source: VersionSource::Path };
    }
    if let Some(v) = headers
        .get("API-Version")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse().ok())
    {
        return ResolvedVersion { version: v, source: VersionSource::Header };
    }
    if let Some(v) = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_accept_version)
    {
        return ResolvedVersion { version: v, source: VersionSource::Accept };
    }
    if let Some(v) = query_version.and_then(|s| s.parse().ok()) {
        return ResolvedVersion { version: v, source: VersionSource::Query };
    }
    ResolvedVersion { version: default_version, source: VersionSource::Default }
}

pub fn is_supported(version: u32, supported: &[u32]) -> bool {
    supported.contains(&version)
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|kv| {
        let mut it = kv.splitn(2, '=');
        let k = it.next()?;
        let v = it.next()?;
        (k == key).then_some(v)
    })
}

/// Resolve and validate the requested version, then echo
/// `API-Version`/`API-Current-Version`/`API-Supported-Versions` on the
/// response (spec §6 "Versioning").
pub async fn version_middleware(State(config): State<Arc<Config>>, request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let query_version = request
        .uri()
        .query()
        .and_then(|q| query_param(q, "version"))
        .map(|s| s.to_string());
    let headers = request.headers().clone();

    let resolved = resolve_version(&path, &headers, query_version.as_deref(), config.api_version_default);

    if !is_supported(resolved.version, &config.api_versions_supported) {
        return crate::error::ApiError::UnsupportedVersion {
            requested: resolved.version.to_string(),
            supported: config.api_versions_supported.clone(),
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let out_headers = response.headers_mut();
    let supported_csv = config
        .api_versions_supported
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    if let Ok(v) = resolved.version.to_string().parse() {
        out_headers.insert("API-Version", v);
    }
    if let Ok(v) = config.api_version_default.to_string().parse() {
        out_headers.insert("API-Current-Version", v);
    }
    if let Ok(v) = supported_csv.parse() {
        out_headers.insert("API-Supported-Versions", v);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn path_prefix_wins_over_everything_else() {
        let mut headers = HeaderMap::new();
        headers.insert("API-Version", HeaderValue::from_static("9"));
        let resolved = resolve_version("/api/v2/recommend/x", &headers, Some("5"), 1);
        assert_eq!(resolved.version, 2);
        assert_eq!(resolved.source, VersionSource::Path);
    }

    #[test]
    fn header_wins_over_accept_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert("API-Version", HeaderValue::from_static("3"));
        headers.insert(axum::http::header::ACCEPT, HeaderValue::from_static("application/vnd.fashion-api.v7+json"));
        let resolved = resolve_version("/api/recommend/x", &headers, Some("5"), 1);
        assert_eq!(resolved.version, 3);
        assert_eq!(resolved.source, VersionSource::Header);
    }

    #[test]
    fn accept_header_parses_vendor_version() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ACCEPT, HeaderValue::from_static("application/vnd.fashion-api.v7+json"));
        let resolved = resolve_version("/api/recommend/x", &headers, Some("5"), 1);
        assert_eq!(resolved.version, 7);
        assert_eq!(resolved.source, VersionSource::Accept);
    }

    #[test]
    fn query_param_used_when_nothing_else_present() {
        let headers = HeaderMap::new();
        let resolved = resolve_version("/api/recommend/x", &headers, Some("5"), 1);
        assert_eq!(resolved.version, 5);
        assert_eq!(resolved.source, VersionSource::Query);
    }

    #[test]
    fn falls_back_to_default_version() {
        let headers = HeaderMap::new();
        let resolved = resolve_version("/api/recommend/x", &headers, None, 1);
        assert_eq!(resolved.version, 1);
        assert_eq!(resolved.source, VersionSource::Default);
    }

    #[test]
    fn supported_check_is_exact_membership() {
        assert!(is_supported(1, &[1, 2]));
        assert!(!is_supported(3, &[1, 2]));
    }
}
