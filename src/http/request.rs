//! Request manager: serializes one WordPress REST call end to end.
//!
//! Order of operations per attempt: render, auth headers, rate grant,
//! global concurrency permit, transport, then retry classification. No lock
//! is held across the transport; auth headers are read out first.

// crates.io
use http::{
    HeaderMap, StatusCode,
    header::{IF_MODIFIED_SINCE, IF_NONE_MATCH},
};
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde_json::{Map as JsonMap, Value};
use tokio_util::io::ReaderStream;
use url::Url;
// self
use crate::{
    _prelude::*,
    auth::{AuthManager, RefreshOutcome},
    config::ClientSettings,
    context::Ctx,
    http::{
        rate::{GlobalLimiter, RateLimiter},
        retry::{RetryClass, RetryPolicy, RetryState, classify_status, classify_transport},
        semantics::{ListMeta, Validators, retry_after},
    },
    ops::{OperationSpec, RenderedRequest, UploadSource, render},
    security,
};

/// Validators attached to a conditional GET.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// When set, the request carries `If-None-Match`/`If-Modified-Since`.
    pub conditional: Option<Validators>,
}

/// Decoded response of one executed operation.
#[derive(Clone, Debug)]
pub struct HttpOutcome {
    /// Final HTTP status.
    pub status: StatusCode,
    /// Decoded JSON body; `Null` for 304 and empty bodies.
    pub body: Value,
    /// Validators advertised by the origin.
    pub validators: Validators,
    /// Pagination metadata for list responses.
    pub list_meta: ListMeta,
    /// Response headers retained for cache semantics.
    pub headers: HeaderMap,
    /// Wall-clock duration of the whole call including retries.
    pub elapsed: Duration,
    /// HTTP attempts performed.
    pub attempts: u32,
}
impl HttpOutcome {
    /// Whether the origin answered 304 Not Modified.
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

/// Per-site HTTP execution engine.
#[derive(Debug)]
pub struct RequestManager {
    site_id: String,
    base_url: Url,
    settings: ClientSettings,
    client: Client,
    auth: Arc<AuthManager>,
    rate: Arc<RateLimiter>,
    global: Arc<GlobalLimiter>,
}
impl RequestManager {
    /// Build a manager for one site; `client` must have connect timeout and
    /// keep-alive configured by the caller.
    pub fn new(
        site_id: impl Into<String>,
        base_url: Url,
        settings: ClientSettings,
        client: Client,
        auth: Arc<AuthManager>,
        rate: Arc<RateLimiter>,
        global: Arc<GlobalLimiter>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            base_url,
            settings,
            client,
            auth,
            rate,
            global,
        }
    }

    /// Rate limiter handle, for diagnostics.
    pub fn rate(&self) -> &RateLimiter {
        &self.rate
    }

    /// Execute one operation against the site.
    #[tracing::instrument(skip(self, params, ctx, options), fields(site = %self.site_id, op = spec.name))]
    pub async fn execute(
        &self,
        spec: &'static OperationSpec,
        params: &JsonMap<String, Value>,
        ctx: &Ctx,
        options: RequestOptions,
    ) -> Result<HttpOutcome> {
        let rendered = render(spec, params)?;
        let url = self.build_url(&rendered)?;
        let total_timeout = if spec.streaming_upload {
            self.settings.upload_timeout
        } else {
            self.settings.request_timeout
        };
        let ctx = ctx.child(total_timeout);
        let started = Instant::now();
        let mut retry = RetryState::new(RetryPolicy::with_retries(self.settings.retry_attempts));
        let mut auth_retried = false;

        loop {
            ctx.check()?;

            let headers = self.auth.headers(&ctx).await?;

            self.rate.acquire(&ctx).await?;

            let sent = {
                let _permit = self.global.acquire(&ctx).await?;
                let request = self
                    .build_attempt(spec, &rendered, &url, headers, &options)
                    .await?;

                ctx.run(async { request.send().await.map_err(Error::from) })
                    .await
            };

            match sent {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status == StatusCode::NOT_MODIFIED {
                        return self.decode(response, started, retry.attempts()).await;
                    }
                    if status == StatusCode::UNAUTHORIZED {
                        if auth_retried {
                            return Err(Error::AuthExpired);
                        }

                        auth_retried = true;

                        tracing::debug!("401 received; forcing one credential refresh");

                        match self.auth.force_refresh(&ctx).await? {
                            RefreshOutcome::Refreshed => continue,
                            RefreshOutcome::Unsupported => return Err(Error::AuthExpired),
                        }
                    }

                    let pacing = retry_after(response.headers());
                    let class = classify_status(status);
                    let may_retry = match class {
                        RetryClass::Transient => {
                            spec.idempotent || spec.mutation.is_none() || pacing.is_some()
                        }
                        RetryClass::TransientIdempotentOnly => spec.idempotent,
                        RetryClass::Fatal => false,
                    };

                    if may_retry && let Some(delay) = retry.next_delay(pacing) {
                        tracing::debug!(status = %status, ?delay, "retrying after upstream failure");
                        ctx.sleep(delay).await?;

                        continue;
                    }

                    return Err(self
                        .status_error(status, pacing, retry.attempts(), response)
                        .await);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(Error::Timeout) => return Err(Error::Timeout),
                Err(err) => {
                    let class = match &err {
                        Error::Reqwest(inner) => classify_transport(inner),
                        _ => RetryClass::Fatal,
                    };
                    let may_retry = match class {
                        RetryClass::Transient => true,
                        RetryClass::TransientIdempotentOnly => spec.idempotent,
                        RetryClass::Fatal => false,
                    };

                    if may_retry && let Some(delay) = retry.next_delay(None) {
                        tracing::debug!(error = %err, ?delay, "retrying after transport failure");
                        ctx.sleep(delay).await?;

                        continue;
                    }

                    return Err(err);
                }
            }
        }
    }

    fn build_url(&self, rendered: &RenderedRequest) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{}", rendered.path))?;

        if !rendered.query.is_empty() {
            let mut pairs = url.query_pairs_mut();

            for (name, value) in &rendered.query {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }

    async fn build_attempt(
        &self,
        spec: &'static OperationSpec,
        rendered: &RenderedRequest,
        url: &Url,
        headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder> {
        let mut request = self
            .client
            .request(spec.method.clone(), url.clone())
            .headers(headers);

        if let Some(validators) = &options.conditional {
            if let Some(etag) = &validators.etag
                && let Ok(value) = http::HeaderValue::from_str(etag)
            {
                request = request.header(IF_NONE_MATCH, value);
            }
            if let Some(last_modified) = &validators.last_modified {
                let http_date = httpdate::fmt_http_date((*last_modified).into());

                if let Ok(value) = http::HeaderValue::from_str(&http_date) {
                    request = request.header(IF_MODIFIED_SINCE, value);
                }
            }
        }

        if let Some(upload) = &rendered.upload {
            // The multipart form is rebuilt from disk on every attempt so a
            // retried upload re-streams from the start of the file.
            request = request.multipart(self.upload_form(upload, rendered.body.as_ref()).await?);
        } else if let Some(body) = &rendered.body {
            request = request.json(body);
        }

        Ok(request)
    }

    async fn upload_form(&self, upload: &UploadSource, body: Option<&Value>) -> Result<Form> {
        let file = tokio::fs::File::open(&upload.file_path).await?;
        let length = file.metadata().await?.len();
        let stream = ReaderStream::with_capacity(file, self.settings.upload_chunk_bytes);
        let file_name = std::path::Path::new(&upload.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_owned());
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), length)
            .file_name(file_name);
        let mut form = Form::new().part(upload.field, part);

        if let Some(Value::Object(fields)) = body {
            for (name, value) in fields {
                form = form.text(name.clone(), text_value(value));
            }
        }

        Ok(form)
    }

    async fn decode(
        &self,
        response: reqwest::Response,
        started: Instant,
        attempts: u32,
    ) -> Result<HttpOutcome> {
        let status = response.status();
        let headers = response.headers().clone();
        let validators = Validators::from_headers(&headers);
        let list_meta = ListMeta::from_headers(&headers);
        let body = if status == StatusCode::NOT_MODIFIED {
            Value::Null
        } else {
            let bytes = response.bytes().await?;

            if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)?
            }
        };
        let elapsed = started.elapsed();

        tracing::debug!(site = %self.site_id, status = %status, ?elapsed, attempts, "request complete");

        Ok(HttpOutcome {
            status,
            body,
            validators,
            list_meta,
            headers,
            elapsed,
            attempts,
        })
    }

    async fn status_error(
        &self,
        status: StatusCode,
        pacing: Option<Duration>,
        attempts: u32,
        response: reqwest::Response,
    ) -> Error {
        let excerpt = response
            .text()
            .await
            .ok()
            .and_then(|text| security::excerpt(&text));

        if status == StatusCode::TOO_MANY_REQUESTS {
            Error::UpstreamRateLimited {
                retry_after: pacing,
            }
        } else if status.is_server_error() {
            Error::UpstreamUnavailable {
                status: status.as_u16(),
                attempts,
                excerpt,
            }
        } else {
            Error::UpstreamClient {
                status: status.as_u16(),
                excerpt,
            }
        }
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    // self
    use super::*;

    #[test]
    fn text_values_keep_strings_verbatim() {
        assert_eq!(text_value(&Value::String("plain".into())), "plain");
        assert_eq!(text_value(&serde_json::json!(7)), "7");
        assert_eq!(text_value(&serde_json::json!(["a", "b"])), "[\"a\",\"b\"]");
    }
}
