// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use dynaform_app::{
    ActiveFilter, ChangeRequest, ChangeResponse, FormBackend, InitResponse, KeyParams,
    LoadResponse, MutationResponse, PageQuery, Record, Value,
};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const KEYFIELD_PREFIX: &str = "keyfield_";

/// Supplies the `Authorization` header for each request, asked at send time.
pub trait CredentialsProvider: fmt::Debug + Send + Sync {
    fn authorization(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialsProvider for NoCredentials {
    fn authorization(&self) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.trim().to_owned(),
        }
    }

    pub fn from_env(name: &str) -> Result<Self> {
        let token = std::env::var(name).map_err(|_| {
            anyhow!("environment variable {name} is not set -- export it or drop session.token_env")
        })?;
        if token.trim().is_empty() {
            bail!("environment variable {name} is empty");
        }
        Ok(Self::new(&token))
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl CredentialsProvider for BearerToken {
    fn authorization(&self) -> Option<String> {
        Some(format!("Bearer {}", self.token))
    }
}

/// Blocking HTTP transport for the form operations.
///
/// Every operation is addressed as `{base_url}/{op}?form=<id>`. Reads carry
/// their criteria in the query string; `create` and `update` post the record
/// as JSON and put the record keys in the query as `keyfield_<name>`.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    timeout: Duration,
    http: HttpClient,
    credentials: Arc<dyn CredentialsProvider>,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::with_credentials(base_url, timeout, Arc::new(NoCredentials))
    }

    pub fn with_credentials(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("server.base_url must not be empty");
        }
        let base_url =
            Url::parse(trimmed).with_context(|| format!("parse server.base_url {trimmed:?}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!(
                "server.base_url must use http or https, got {:?}",
                base_url.scheme()
            );
        }
        if base_url.cannot_be_a_base() {
            bail!("server.base_url {trimmed:?} cannot carry a path");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            timeout,
            http,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Address of `op` for `form` with `pairs` appended to the query string.
    pub fn operation_url(&self, op: &str, form: &str, pairs: &[(String, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("server.base_url cannot carry a path"))?
            .pop_if_empty()
            .push(op);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("form", form);
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn get<T: DeserializeOwned>(&self, op: &str, form: &str, pairs: &[(String, String)]) -> Result<T> {
        let url = self.operation_url(op, form, pairs)?;
        let body = self.execute(op, form, &url, self.http.get(url.clone()))?;
        decode(op, &body)
    }

    fn post<T: DeserializeOwned>(
        &self,
        op: &str,
        form: &str,
        pairs: &[(String, String)],
        record: &Record,
    ) -> Result<T> {
        let url = self.operation_url(op, form, pairs)?;
        let body = self.execute(op, form, &url, self.http.post(url.clone()).json(record))?;
        decode(op, &body)
    }

    fn execute(&self, op: &str, form: &str, url: &Url, request: RequestBuilder) -> Result<String> {
        let span = tracing::debug_span!("form_request", op, form, url = %url);
        let _entered = span.enter();

        let request = match self.credentials.authorization() {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        };
        let started = Instant::now();
        let response = request
            .send()
            .map_err(|error| connection_error(self.base_url.as_str(), error))?;

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response received"
        );
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let error = clean_error_response(status, &body);
            tracing::warn!(op, status = status.as_u16(), "{error}");
            return Err(error);
        }
        response
            .text()
            .with_context(|| format!("read {op} response"))
    }
}

impl FormBackend for Client {
    fn init(&mut self, form: &str) -> Result<InitResponse> {
        self.get("init", form, &[])
    }

    fn load_page(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse> {
        self.get("loaddata", form, &query.to_query_pairs())
    }

    fn create(&mut self, form: &str, record: &Record, keys: &KeyParams) -> Result<MutationResponse> {
        self.post("create", form, &keyfield_pairs(keys), record)
    }

    fn update(&mut self, form: &str, record: &Record, keys: &KeyParams) -> Result<MutationResponse> {
        self.post("update", form, &keyfield_pairs(keys), record)
    }

    fn delete(&mut self, form: &str, keys: &KeyParams) -> Result<MutationResponse> {
        self.get("delete", form, &keyfield_pairs(keys))
    }

    fn change(&mut self, form: &str, request: &ChangeRequest) -> Result<ChangeResponse> {
        let mut pairs = vec![
            ("field".to_owned(), request.field.clone()),
            ("action".to_owned(), request.action.clone()),
            ("value".to_owned(), request.value.display()),
        ];
        pairs.extend(keyfield_pairs(&request.keyfields));
        self.get("change", form, &pairs)
    }

    fn rebuild(&mut self, form: &str, query: &PageQuery) -> Result<LoadResponse> {
        self.get("rebuild", form, &query.to_query_pairs())
    }

    fn save_active_filter(&mut self, form: &str, filter: ActiveFilter) -> Result<()> {
        let pairs = [("activeFilter".to_owned(), filter.as_str().to_owned())];
        let url = self.operation_url("saveActiveFilter", form, &pairs)?;
        let body = self.execute("saveActiveFilter", form, &url, self.http.get(url.clone()))?;
        if body.trim().is_empty() {
            return Ok(());
        }
        let ack: Ack = decode("saveActiveFilter", &body)?;
        if let Some(success) = ack.success
            && !success.is_truthy()
        {
            bail!(
                "{}",
                ack.message
                    .unwrap_or_else(|| "server refused the active filter".to_owned())
            );
        }
        Ok(())
    }
}

fn keyfield_pairs(keys: &KeyParams) -> Vec<(String, String)> {
    keys.iter()
        .map(|(name, value)| (format!("{KEYFIELD_PREFIX}{name}"), value.clone()))
        .collect()
}

fn decode<T: DeserializeOwned>(op: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).with_context(|| format!("decode {op} response"))
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!(
            "{base_url} did not answer in time -- raise server.timeout or retry ({error})"
        );
    }
    anyhow!("cannot reach {base_url} -- check server.base_url and that the server is running ({error})")
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body) {
        if let Some(error) = parsed.error
            && !error.is_empty()
        {
            return anyhow!("server error ({}): {}", status.as_u16(), error);
        }
        if let Some(message) = parsed.message
            && !message.is_empty()
        {
            return anyhow!("server error ({}): {}", status.as_u16(), message);
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() < 100 && !trimmed.contains('{') {
        return anyhow!("server error ({}): {}", status.as_u16(), trimmed);
    }

    anyhow!("server returned {}", status.as_u16())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: Option<Value>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Client, clean_error_response, keyfield_pairs};
    use anyhow::Result;
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn error_envelope_prefers_error_then_message() {
        let error = clean_error_response(StatusCode::BAD_REQUEST, r#"{"error":"bad form"}"#);
        assert_eq!(error.to_string(), "server error (400): bad form");

        let error = clean_error_response(StatusCode::FORBIDDEN, r#"{"message":"no access"}"#);
        assert_eq!(error.to_string(), "server error (403): no access");
    }

    #[test]
    fn short_plain_bodies_are_kept_and_long_ones_dropped() {
        let error = clean_error_response(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(error.to_string(), "server error (502): upstream down");

        let error = clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(400));
        assert_eq!(error.to_string(), "server returned 500");

        let error = clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"trace":[]}"#);
        assert_eq!(error.to_string(), "server returned 500");
    }

    #[test]
    fn keys_get_the_keyfield_prefix() {
        let pairs = keyfield_pairs(&vec![("id".to_owned(), "7".to_owned())]);
        assert_eq!(pairs, vec![("keyfield_id".to_owned(), "7".to_owned())]);
    }

    #[test]
    fn base_url_must_be_http() {
        let error = Client::new("ftp://example.com/forms", Duration::from_secs(1))
            .expect_err("ftp should be rejected");
        assert!(error.to_string().contains("http or https"));

        let error = Client::new("  ", Duration::from_secs(1)).expect_err("empty url");
        assert!(error.to_string().contains("must not be empty"));
    }

    #[test]
    fn operation_url_appends_op_and_encodes_query() -> Result<()> {
        let client = Client::new("http://localhost:8080/api/", Duration::from_secs(1))?;
        let url = client.operation_url(
            "loaddata",
            "invoice_form",
            &[("search".to_owned(), "acme corp&co".to_owned())],
        )?;
        assert_eq!(url.path(), "/api/loaddata");
        assert_eq!(
            url.query(),
            Some("form=invoice_form&search=acme+corp%26co")
        );
        Ok(())
    }
}
