//! `reqwest`-backed [`Fetcher`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::{Origin, Url};

use crate::{Fetcher, NetError, Request, RequestMode, Response, ResponseType};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Origin the loader fetches on behalf of. Responses from any other
    /// origin are not `basic`. When unset, each request's own origin is used.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("folio-sw/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            origin: None,
        }
    }
}

impl LoaderConfig {
    /// Set the origin responses are classified against.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Resource loader for fetching URLs.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = ?config.origin.as_ref().map(Url::as_str), "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn client_origin(&self, request: &Request) -> Origin {
        self.config
            .origin
            .as_ref()
            .unwrap_or(&request.url)
            .origin()
    }
}

/// Decide how a response fetched from `final_url` is exposed to a client
/// at `client_origin`.
pub fn classify(
    client_origin: &Origin,
    final_url: &Url,
    mode: RequestMode,
) -> Result<ResponseType, NetError> {
    if &final_url.origin() == client_origin {
        return Ok(ResponseType::Basic);
    }
    match mode {
        RequestMode::SameOrigin => Err(NetError::CrossOrigin(final_url.clone())),
        RequestMode::NoCors => Ok(ResponseType::Opaque),
        RequestMode::Cors | RequestMode::Navigate => Ok(ResponseType::Cors),
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref referrer) = request.referrer {
            req_builder = req_builder.header("Referer", referrer.as_str());
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let url = response.url().clone();
        let redirected = url != request.url;
        let response_type = classify(&self.client_origin(request), &url, request.mode)?;

        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque response, dropping headers and body");
            return Ok(Response {
                redirected,
                ..Response::opaque(url)
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        let mut out = Response::new(url, status)
            .with_body(body)
            .with_type(response_type);
        out.headers = headers;
        out.redirected = redirected;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Url::parse(s).unwrap().origin()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("folio-sw/"));
        assert_eq!(config.max_redirects, 10);
        assert!(config.origin.is_none());
    }

    #[test]
    fn test_same_origin_is_basic() {
        let site = origin("https://patrickprunty.com/");
        let url = Url::parse("https://patrickprunty.com/photography").unwrap();
        assert_eq!(
            classify(&site, &url, RequestMode::NoCors).unwrap(),
            ResponseType::Basic
        );
    }

    #[test]
    fn test_cross_origin_by_mode() {
        let site = origin("https://patrickprunty.com/");
        let url = Url::parse("https://fonts.example.net/inter.woff2").unwrap();

        assert_eq!(
            classify(&site, &url, RequestMode::Cors).unwrap(),
            ResponseType::Cors
        );
        assert_eq!(
            classify(&site, &url, RequestMode::NoCors).unwrap(),
            ResponseType::Opaque
        );
        assert!(matches!(
            classify(&site, &url, RequestMode::SameOrigin),
            Err(NetError::CrossOrigin(_))
        ));
    }

    #[test]
    fn test_port_is_part_of_origin() {
        let site = origin("http://localhost:3000/");
        let url = Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(
            classify(&site, &url, RequestMode::Cors).unwrap(),
            ResponseType::Cors
        );
    }
}
