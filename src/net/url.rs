use url::Url;

/// Pieces of a `wss://host[:port]/path` endpoint the sessions need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub target: String,
}

/// Accepts only `wss://`; default port 443, default path `/`. The query
/// string, when present, stays part of the handshake target.
pub fn parse_wss_url(raw: &str) -> Option<UrlParts> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme() != "wss" {
        return None;
    }
    let host = parsed.host_str()?.to_string();
    let port = parsed.port().unwrap_or(443);
    let mut target = parsed.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = parsed.query() {
        target.push('?');
        target.push_str(query);
    }
    Some(UrlParts {
        scheme: "wss".to_string(),
        host,
        port,
        target,
    })
}
