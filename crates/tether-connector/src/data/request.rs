use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::effects::Transport;

/// HTTP method of a [`WebRequest`].
///
/// The method is never set directly: a request carrying a body or form
/// fields is a `Post`, anything else is a `Get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Immutable description of one HTTP request.
///
/// A `WebRequest` never performs I/O. Each call to
/// [`create_transport`](Self::create_transport) begins a fresh fetch on the
/// given transport.
///
/// # Examples
///
/// ```
/// use tether_connector::{Method, WebRequest};
///
/// let request = WebRequest::post_form("~/login", vec![("user".into(), "ada".into())])
///     .header("Accept", "application/json")
///     .cache_bust(true);
///
/// assert_eq!(request.method(), Method::Post);
/// assert!(request.is_relative());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct WebRequest {
    url: String,
    headers: Arc<[(String, String)]>,
    body: Option<Bytes>,
    form: Arc<[(String, String)]>,
    cache_bust: bool,
}

impl fmt::Debug for WebRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRequest")
            .field("method", &self.method())
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(Bytes::len))
            .field("form", &self.form)
            .field("cache_bust", &self.cache_bust)
            .finish()
    }
}

impl WebRequest {
    /// A `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Arc::new([]),
            body: None,
            form: Arc::new([]),
            cache_bust: false,
        }
    }

    /// A `POST` request with a raw body.
    pub fn post_bytes(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    /// A `POST` request with url-encoded form fields.
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            form: Arc::from(fields),
            ..Self::get(url)
        }
    }

    /// Add a single header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers: Vec<_> = self.headers.iter().cloned().collect();
        headers.push((key.into(), value.into()));
        self.headers = Arc::from(headers);
        self
    }

    /// Replace all headers.
    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Arc::from(headers);
        self
    }

    /// Ask the connector to append a cache-busting query parameter.
    #[must_use]
    pub fn cache_bust(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }

    /// Same request pointed at another URL.
    #[must_use]
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }

    pub fn url(&self) -> &str { &self.url }

    pub fn method(&self) -> Method {
        if self.body.is_some() || !self.form.is_empty() {
            Method::Post
        } else {
            Method::Get
        }
    }

    pub fn header_list(&self) -> &[(String, String)] { &self.headers }

    pub fn body(&self) -> Option<&Bytes> { self.body.as_ref() }

    pub fn form(&self) -> &[(String, String)] { &self.form }

    pub fn wants_cache_bust(&self) -> bool { self.cache_bust }

    /// Whether the URL must be resolved against the connector's base URL.
    pub fn is_relative(&self) -> bool { self.url.starts_with('~') }

    /// Begin one fetch of this request on `transport`.
    pub fn create_transport<T: Transport>(&self, transport: &T) -> T::Handle {
        transport.begin(self)
    }
}
