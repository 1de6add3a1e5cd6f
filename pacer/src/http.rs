use crate::error::RunError;
use crate::transaction::{BoxFuture, Transaction};
use pacer_core::{Method, RunConfig, TransportErrorKind};
use reqwest::Client;
use std::error::Error as _;
use std::io;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use url::{Host, Url};

/// Sends the configured request to the target endpoint.
///
/// The response body is read to completion so the measured duration covers the whole
/// exchange; its contents are ignored.
#[derive(Clone)]
pub struct HttpTransaction {
    client: Client,
    method: reqwest::Method,
    url: Url,
}

impl HttpTransaction {
    pub fn new(client: Client, method: Method, url: Url) -> Self {
        Self {
            client,
            method: to_reqwest_method(method),
            url,
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, RunError> {
        let url = config.target.url()?;
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_workers)
            .build()?;
        Ok(Self::new(client, config.target.method, url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transaction for HttpTransaction {
    type Future = BoxFuture<'static, Result<u16, TransportErrorKind>>;

    fn call(&self) -> Self::Future {
        let request = self.client.request(self.method.clone(), self.url.clone());
        Box::pin(async move {
            let response = request.send().await.map_err(|e| classify(&e))?;
            let status = response.status().as_u16();
            response
                .bytes()
                .await
                .map_err(|_| TransportErrorKind::Body)?;
            Ok(status)
        })
    }

    /// Resolves the target host so an unreachable name aborts the run up front instead of
    /// failing every request.
    fn preflight(&self) -> BoxFuture<'_, Result<(), RunError>> {
        Box::pin(async move {
            let host = match self.url.host() {
                Some(Host::Domain(domain)) => domain.to_string(),
                // Literal addresses need no lookup.
                Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) | None => return Ok(()),
            };
            let port = self.url.port_or_known_default().unwrap_or(80);

            let resolved = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|source| RunError::Unresolvable {
                    host: host.clone(),
                    source,
                })?
                .next();

            match resolved {
                Some(addr) => {
                    debug!("Resolved {host} to {addr}");
                    Ok(())
                }
                None => Err(RunError::Unresolvable {
                    host,
                    source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                }),
            }
        })
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if is_dns_error(err) {
        TransportErrorKind::Dns
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_request() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    }
}

// NOTE: reqwest has no dedicated flag for resolver failures; hyper reports them as
// "dns error" somewhere in the source chain.
fn is_dns_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.to_string().contains("dns error") {
            return true;
        }
        source = e.source();
    }
    false
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}
