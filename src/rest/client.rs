use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::auth::SessionTokenProvider;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::metrics::ApiMetrics;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
    Empty,
}

impl ApiResponse {
    fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            return ApiResponse::Empty;
        }
        match serde_json::from_str(&text) {
            Ok(value) => ApiResponse::Json(value),
            Err(_) => ApiResponse::Text(text),
        }
    }

    /// Decode into a typed model. An empty body decodes as JSON `null`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let value = match self {
            ApiResponse::Json(value) => value,
            ApiResponse::Text(text) => Value::String(text),
            ApiResponse::Empty => Value::Null,
        };
        Ok(serde_json::from_value(value)?)
    }
}

/// Authenticated client for the project-manager REST API
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: SessionTokenProvider,
    min_token_validity: u64,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, tokens: SessionTokenProvider) -> Result<Self, ApiError> {
        Url::parse(&config.base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            min_token_validity: config.min_token_validity,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.refresh(self.min_token_validity).await?;
        Ok(self
            .http
            .request(method, self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", token)))
    }

    /// Send a request with an optional JSON body
    #[tracing::instrument(name = "api.request", skip(self, method, body), fields(method = %method))]
    pub async fn request(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = self
            .authorized(method.clone(), path)
            .await?
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(method, path, request).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        request: RequestBuilder,
    ) -> Result<ApiResponse, ApiError> {
        let start = Instant::now();
        let sent = request.send().await;
        let status = sent.as_ref().ok().map(|response| response.status().as_u16());
        let result = match sent {
            Ok(response) => read_response(response).await,
            Err(e) => Err(ApiError::Request(e)),
        };
        ApiMetrics::record_request(method.as_str(), status, start.elapsed());

        if let Err(ref e) = result {
            tracing::warn!(path = %path, error = %e, "API request failed");
        }
        result
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(path, Method::GET, None).await?.decode()
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(path, Method::POST, Some(&body)).await?.decode()
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(path, Method::PUT, Some(&body)).await?.decode()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(path, Method::DELETE, None).await.map(|_| ())
    }

    /// POST a multipart form; the content type is set by the form
    pub async fn post_multipart(&self, path: &str, form: Form) -> Result<ApiResponse, ApiError> {
        let request = self.authorized(Method::POST, path).await?.multipart(form);
        self.execute(Method::POST, path, request).await
    }
}

/// Multipart form for an attachment upload
pub fn attachment_form(
    file_name: &str,
    content: Vec<u8>,
    task_id: Option<String>,
    comment_id: Option<String>,
) -> Form {
    let mut form = Form::new().part("file", Part::bytes(content).file_name(file_name.to_string()));
    if let Some(task_id) = task_id {
        form = form.text("taskId", task_id);
    }
    if let Some(comment_id) = comment_id {
        form = form.text("commentId", comment_id);
    }
    form
}

async fn read_response(response: Response) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(ApiResponse::from_text(text))
}
