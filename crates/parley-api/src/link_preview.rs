//! Link previews: fetch a page once, pull `<title>` and OpenGraph tags out of
//! its head, and remember the result for a while.
//!
//! The server fetches on behalf of clients, so every hop is kept off
//! loopback, private and link-local networks: the target is checked before
//! the request, the client's resolver drops internal addresses, and
//! redirects to internal literals are refused.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use reqwest::Url;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use tokio::net::lookup_host;
use tracing::{debug, warn};

use parley_types::api::LinkPreviewQuery;
use parley_types::models::LinkPreview;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_CACHE_ENTRIES: usize = 1024;
const MAX_PAGE_BYTES: usize = 512 * 1024;
const MAX_REDIRECTS: usize = 3;
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct PreviewCache {
    entries: Mutex<HashMap<String, (Instant, LinkPreview)>>,
}

impl PreviewCache {
    pub fn get(&self, url: &str) -> Option<LinkPreview> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(url)
            .filter(|(at, _)| at.elapsed() < CACHE_TTL)
            .map(|(_, preview)| preview.clone())
    }

    pub fn insert(&self, url: String, preview: LinkPreview) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= MAX_CACHE_ENTRIES {
            entries.retain(|_, (at, _)| at.elapsed() < CACHE_TTL);
        }
        if entries.len() < MAX_CACHE_ENTRIES {
            entries.insert(url, (Instant::now(), preview));
        }
    }
}

pub async fn link_preview(
    State(state): State<AppState>,
    Query(query): Query<LinkPreviewQuery>,
) -> ApiResult<impl IntoResponse> {
    let url = Url::parse(query.url.trim()).map_err(|_| ApiError::bad_request("invalid url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::bad_request("only http and https links are supported"));
    }
    ensure_public(&url).await?;

    let key = url.to_string();
    if let Some(hit) = state.previews.get(&key) {
        debug!("Link preview cache hit for {}", key);
        return Ok(Json(hit));
    }

    let html = fetch_page(&state.http, url).await?;
    let preview = parse_html(&key, &html);
    state.previews.insert(key, preview.clone());
    Ok(Json(preview))
}

/// Client used for previews: short timeout, internal addresses filtered out
/// of DNS answers, and redirects checked hop by hop.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .dns_resolver(Arc::new(PublicResolver))
        .redirect(Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !literal_host_is_public(attempt.url()) {
                attempt.error("redirect to an internal address")
            } else {
                attempt.follow()
            }
        }))
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// True unless `ip` is loopback, private, link-local, shared, multicast or
/// otherwise not routable on the public internet.
pub fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                || a == 0
                || a >= 240
                || (a == 100 && (64..128).contains(&b))
                || (a == 198 && (b == 18 || b == 19)))
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

fn host_of(url: &Url) -> Option<&str> {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
}

/// Host names pass here; they are filtered when resolved.
fn literal_host_is_public(url: &Url) -> bool {
    match host_of(url) {
        Some(host) => host.parse::<IpAddr>().map_or(true, is_public),
        None => false,
    }
}

/// Refuse a target whose host resolves to any internal address.
async fn ensure_public(url: &Url) -> ApiResult<()> {
    let host = host_of(url).ok_or_else(|| ApiError::bad_request("link has no host"))?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err(ApiError::bad_request("link points at an internal address"));
    }
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| {
            warn!("Link preview lookup of {} failed: {}", host, e);
            ApiError::Upstream
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ApiError::Upstream);
    }
    if addrs.iter().any(|addr| !is_public(addr.ip())) {
        return Err(ApiError::bad_request("link points at an internal address"));
    }
    Ok(())
}

/// System resolver with internal addresses removed from every answer, so a
/// name cannot be re-pointed inward between the check and the connect.
struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name))
    }
}

async fn resolve_public(name: Name) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let addrs: Vec<SocketAddr> = lookup_host((name.as_str(), 0))
        .await?
        .filter(|addr| is_public(addr.ip()))
        .collect();
    if addrs.is_empty() {
        return Err(format!("{} has no public address", name.as_str()).into());
    }
    Ok(Box::new(addrs.into_iter()))
}

/// Read at most `MAX_PAGE_BYTES` of the body; the head is all we need.
async fn fetch_page(client: &reqwest::Client, url: Url) -> ApiResult<String> {
    let mut resp = client.get(url.clone()).send().await.map_err(|e| {
        warn!("Link preview fetch of {} failed: {}", url, e);
        ApiError::Upstream
    })?;
    if !resp.status().is_success() {
        warn!("Link preview fetch of {} returned {}", url, resp.status());
        return Err(ApiError::Upstream);
    }

    let mut buf = Vec::new();
    while buf.len() < MAX_PAGE_BYTES {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_PAGE_BYTES - buf.len();
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Link preview read of {} failed: {}", url, e);
                return Err(ApiError::Upstream);
            }
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn parse_html(url: &str, html: &str) -> LinkPreview {
    let mut preview = LinkPreview {
        url: url.to_string(),
        ..Default::default()
    };
    let lower = html.to_ascii_lowercase();

    let mut description = None;
    let mut pos = 0;
    while let Some(start) = lower[pos..].find("<meta") {
        let start = pos + start;
        let Some(len) = lower[start..].find('>') else {
            break;
        };
        let tag = &html[start..start + len];
        pos = start + len;

        let key = attr(tag, "property").or_else(|| attr(tag, "name"));
        let (Some(key), Some(content)) = (key, attr(tag, "content")) else {
            continue;
        };
        let content = decode_entities(content.trim());
        if content.is_empty() {
            continue;
        }
        match key.to_ascii_lowercase().as_str() {
            "og:title" => preview.title = Some(content),
            "og:description" => preview.description = Some(content),
            "og:image" => preview.image = Some(content),
            "og:site_name" => preview.site_name = Some(content),
            "description" => description = Some(content),
            _ => {}
        }
    }

    if preview.title.is_none() {
        preview.title = title_tag(html, &lower);
    }
    if preview.description.is_none() {
        preview.description = description;
    }
    preview
}

fn title_tag(html: &str, lower: &str) -> Option<String> {
    let open = lower.find("<title")?;
    let body = open + lower[open..].find('>')? + 1;
    let close = body + lower[body..].find("</title")?;
    let title = decode_entities(html[body..close].trim());
    (!title.is_empty()).then_some(title)
}

/// Value of `name="..."` (or single-quoted) inside a tag.
fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find(name) {
        let at = from + found;
        from = at + name.len();

        let boundary = at == 0 || lower.as_bytes()[at - 1].is_ascii_whitespace();
        let rest = lower[from..].trim_start();
        if !boundary || !rest.starts_with('=') {
            continue;
        }
        let value_start = tag.len() - rest[1..].trim_start().len();
        let quote = tag[value_start..].chars().next()?;
        if quote != '"' && quote != '\'' {
            continue;
        }
        let value = &tag[value_start + 1..];
        return value.find(quote).map(|end| &value[..end]);
    }
    None
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opengraph_wins_over_title() {
        let html = r#"<html><head>
            <title>Fallback</title>
            <meta property="og:title" content="Rust &amp; Friends">
            <meta property="og:description" content='All about "crates"'>
            <meta property="og:image" content="https://example.com/a.png" />
            <meta property="og:site_name" content="Example">
        </head></html>"#;
        let preview = parse_html("https://example.com", html);
        assert_eq!(preview.title.as_deref(), Some("Rust & Friends"));
        assert_eq!(preview.description.as_deref(), Some("All about \"crates\""));
        assert_eq!(preview.image.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(preview.site_name.as_deref(), Some("Example"));
    }

    #[test]
    fn falls_back_to_title_and_meta_description() {
        let html = r#"<HEAD><TITLE> Plain page </TITLE>
            <META NAME="description" CONTENT="Nothing fancy"></HEAD>"#;
        let preview = parse_html("http://plain.test", html);
        assert_eq!(preview.title.as_deref(), Some("Plain page"));
        assert_eq!(preview.description.as_deref(), Some("Nothing fancy"));
        assert_eq!(preview.image, None);
    }

    #[test]
    fn attribute_names_must_stand_alone() {
        let tag = r#"<meta data-name="x" name="description" content="y""#;
        assert_eq!(attr(tag, "name"), Some("description"));
        assert_eq!(attr(tag, "content"), Some("y"));
        assert_eq!(attr(tag, "missing"), None);
    }

    #[test]
    fn internal_addresses_are_not_public() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(!is_public(ip.parse().unwrap()), "{ip} should be refused");
        }
        for ip in ["93.184.216.34", "1.1.1.1", "2606:4700:4700::1111"] {
            assert!(is_public(ip.parse().unwrap()), "{ip} should be allowed");
        }
    }

    #[test]
    fn redirects_to_internal_literals_are_refused() {
        let check = |s: &str| literal_host_is_public(&Url::parse(s).unwrap());
        assert!(!check("http://127.0.0.1/admin"));
        assert!(!check("http://[::1]:8080/"));
        assert!(!check("http://169.254.169.254/latest/meta-data"));
        assert!(check("https://example.com/"));
        assert!(check("http://93.184.216.34/"));
    }

    #[tokio::test]
    async fn internal_targets_are_rejected_before_fetching() {
        for target in ["http://127.0.0.1:9/", "http://[::1]/", "http://10.0.0.8/", "http://localhost/"] {
            let err = ensure_public(&Url::parse(target).unwrap()).await.unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)), "{target}");
        }
    }

    #[test]
    fn cache_returns_fresh_entries() {
        let cache = PreviewCache::default();
        assert!(cache.get("https://a.test").is_none());
        let preview = LinkPreview {
            url: "https://a.test".into(),
            title: Some("A".into()),
            ..Default::default()
        };
        cache.insert("https://a.test".into(), preview.clone());
        assert_eq!(cache.get("https://a.test"), Some(preview));
    }
}
