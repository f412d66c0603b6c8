//! Descriptor-configured HTTP API tool
//!
//! The endpoint, method and credentials come from the descriptor's
//! implementation-specific fields; call arguments become query parameters
//! (GET) or the JSON body (POST).

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::warn;

use super::super::registry::ToolError;
use super::super::traits::{Tool, ToolContext};
use crate::catalog::ToolDescriptor;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BYTES: usize = 256 * 1024;

pub struct HttpRequestTool {
    name: String,
    client: Client,
    url: Url,
    method: Method,
    api_key: Option<String>,
    auth_header: String,
    max_bytes: usize,
    streaming: bool,
}

impl HttpRequestTool {
    /// Build from descriptor settings. Missing endpoint or credentials fail
    /// construction, which the registry records as a failure.
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Result<Self> {
        let raw_url = descriptor.setting_str("url").ok_or_else(|| {
            ToolError::Config(format!("tool '{}' has no 'url' setting", descriptor.name))
        })?;
        let url = Url::parse(raw_url)
            .map_err(|err| ToolError::Config(format!("malformed url '{raw_url}': {err}")))?;
        let allow_insecure = descriptor
            .setting("allow_insecure")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        validate_url(&url, allow_insecure)?;

        let method = normalize_method(descriptor.setting_str("method"))?;

        let api_key = match descriptor.setting_str("api_key_env") {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ToolError::Config(format!("environment variable '{var}' is not set"))
            })?),
            None => None,
        };
        let auth_header = descriptor
            .setting_str("auth_header")
            .unwrap_or("Authorization")
            .to_string();

        let timeout = descriptor
            .setting("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);
        let max_bytes = descriptor
            .setting("max_bytes")
            .and_then(Value::as_u64)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .unwrap_or(DEFAULT_MAX_BYTES);
        if max_bytes == 0 {
            return Err(ToolError::Config("max_bytes must be greater than zero".into()).into());
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(3))
            .timeout(Duration::from_secs(timeout))
            .user_agent(concat!("toolhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|error| {
                warn!(?error, "Failed to build dedicated http client; falling back to default");
                Client::new()
            });

        Ok(Self {
            name: descriptor.name.clone(),
            client,
            url,
            method,
            api_key,
            auth_header,
            max_bytes,
            streaming: descriptor.supports_streaming,
        })
    }

    fn build_request(&self, args: &Value) -> Result<reqwest::RequestBuilder> {
        let mut request = self.client.request(self.method.clone(), self.url.clone());
        if let Some(key) = &self.api_key {
            let value = if self.auth_header.eq_ignore_ascii_case("authorization") {
                format!("Bearer {key}")
            } else {
                key.clone()
            };
            request = request.header(self.auth_header.as_str(), value);
        }

        if self.method == Method::GET {
            let params: Vec<(String, String)> = match args {
                Value::Object(map) => map
                    .iter()
                    .map(|(key, value)| {
                        let rendered = match value {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), rendered)
                    })
                    .collect(),
                Value::Null => Vec::new(),
                _ => return Err(anyhow!("invalid argument: GET arguments must be an object")),
            };
            request = request.query(&params);
        } else {
            request = request.json(args);
        }
        Ok(request)
    }

    async fn run(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let response = self
            .build_request(&args)?
            .send()
            .await
            .map_err(|err| ToolError::Upstream(format!("request to {} failed: {err}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &response).into());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut buffer: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if ctx.is_cancelled() {
                return Err(ToolError::Cancelled.into());
            }
            let bytes = chunk.with_context(|| format!("Failed to read response from {}", self.url))?;
            if ctx.is_streaming() {
                ctx.emit(json!({ "chunk": String::from_utf8_lossy(&bytes) })).await;
            }
            let remaining = self.max_bytes.saturating_sub(buffer.len());
            if bytes.len() > remaining {
                buffer.extend_from_slice(&bytes[..remaining]);
                truncated = true;
                break;
            }
            buffer.extend_from_slice(&bytes);
        }

        let body = if content_type.contains("json") && !truncated {
            serde_json::from_slice(&buffer)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&buffer).to_string()))
        } else {
            Value::String(String::from_utf8_lossy(&buffer).to_string())
        };

        Ok(json!({
            "status": status.as_u16(),
            "content_type": content_type,
            "body": body,
            "truncated": truncated,
        }))
    }
}

fn status_error(status: StatusCode, response: &reqwest::Response) -> ToolError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ToolError::Auth(format!("upstream returned {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ToolError::RateLimited {
            message: format!("upstream returned {status}"),
            retry_after_secs: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok()),
        },
        other => ToolError::Upstream(format!("upstream returned {other}")),
    }
}

fn normalize_method(method: Option<&str>) -> Result<Method> {
    let normalized = method.unwrap_or("GET").trim().to_uppercase();
    match normalized.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        other => Err(ToolError::Config(format!(
            "HTTP method '{other}' is not supported. Use GET or POST."
        ))
        .into()),
    }
}

fn validate_url(url: &Url, allow_insecure: bool) -> Result<()> {
    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        other => {
            return Err(ToolError::Config(format!("url scheme '{other}' is not allowed")).into());
        }
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ToolError::Config("credentials in urls are not supported".into()).into());
    }
    if url.host_str().is_none() {
        return Err(ToolError::Config("url must include a host".into()).into());
    }
    Ok(())
}

#[async_trait]
impl Tool for HttpRequestTool {
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        self.run(args, ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{ToolErrorType, classify_error};

    fn descriptor(url: &str) -> ToolDescriptor {
        ToolDescriptor::new("docs_search", "http_request").with_setting("url", json!(url))
    }

    #[test]
    fn requires_a_url_setting() {
        let err = HttpRequestTool::from_descriptor(&ToolDescriptor::new("x", "http_request"))
            .err()
            .expect("missing url");
        assert_eq!(classify_error(&err), ToolErrorType::ConfigError);
    }

    #[test]
    fn rejects_plain_http_unless_allowed() {
        assert!(HttpRequestTool::from_descriptor(&descriptor("http://example.com")).is_err());
        let allowed = descriptor("http://example.com").with_setting("allow_insecure", json!(true));
        assert!(HttpRequestTool::from_descriptor(&allowed).is_ok());
    }

    #[test]
    fn rejects_unsupported_methods() {
        let put = descriptor("https://example.com").with_setting("method", json!("PUT"));
        assert!(HttpRequestTool::from_descriptor(&put).is_err());
    }

    #[test]
    fn missing_credential_env_fails_construction() {
        let keyed = descriptor("https://example.com")
            .with_setting("api_key_env", json!("TOOLHUB_TEST_UNSET_KEY_6F1A"));
        let err = HttpRequestTool::from_descriptor(&keyed).err().expect("unset env");
        assert!(err.to_string().contains("TOOLHUB_TEST_UNSET_KEY_6F1A"));
    }
}
