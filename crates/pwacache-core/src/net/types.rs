use std::collections::BTreeMap;

use url::Url;

/// Response and request headers. Names are stored lowercase.
pub type Headers = BTreeMap<String, String>;

/// What the request is for. Only full-document navigations get the
/// offline-document fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    #[default]
    Other,
}

/// How the network layer should treat HTTP caches on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Default,
    /// Revalidate with the origin, never satisfy from an intermediate cache.
    NoCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub destination: Destination,
    pub headers: Headers,
}

impl Request {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            destination: Destination::Other,
            headers: Headers::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// A top-level page navigation.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Canonical store key for this request.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// Canonical store key for a GET of `url`. Fragments never reach the
/// network, so they are not part of the identity.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    format!("GET {}", url)
}

/// Response tainting as seen by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    /// Same-origin, fully readable.
    #[default]
    Basic,
    /// Cross-origin with CORS, readable.
    Cors,
    /// Cross-origin without CORS, body unreadable.
    Opaque,
    /// Network failure.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
    /// Whether this response was served from the local store.
    pub from_cache: bool,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            headers: Headers::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
            from_cache: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// The synthetic reply used when neither the store nor the network can
    /// answer.
    pub fn offline() -> Self {
        Self::new(503, "Offline").with_header("content-type", "text/plain")
    }

    /// A network failure surfaced to the page as-is (status 0).
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            kind: ResponseKind::Error,
            from_cache: false,
        }
    }

    pub fn is_network_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}
