use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::{ CachedResponse, FetchRequest, Network, NetworkError };

/// Network access through reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpNetwork {
    http: HttpClient,
}

impl HttpNetwork {
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, NetworkError> {
        let mut builder = self.http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await.map_err(|e| NetworkError::Request {
            url: request.url.to_string(),
            message: e.to_string(),
        })?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| NetworkError::Body {
            url: request.url.to_string(),
            message: e.to_string(),
        })?;

        Ok(CachedResponse { status, headers, body })
    }
}
