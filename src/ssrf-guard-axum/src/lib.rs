//! axum middleware that validates a client-supplied URL before a handler
//! sees it.
//!
//! The candidate URL is read from one place in the request (a JSON body
//! field, a query parameter, a path parameter or a header) and evaluated
//! with a [`SharedPolicy`]:
//! - Allowed: the canonical URL is attached as a [`SafeUrl`] extension and,
//!   if asked, written back over the original value.
//! - Denied: the request is rejected with a JSON `{"errors": [...]}` body,
//!   handed to a custom error handler, or passed on with the violations
//!   attached as [`SsrfViolations`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, middleware, routing::get};
//! use ssrf_guard::{GuardConfig, PolicyEngine, SharedPolicy};
//! use ssrf_guard_axum::{GuardOptions, GuardState, Source, ssrf_guard_middleware};
//!
//! let policy = Arc::new(SharedPolicy::new(PolicyEngine::new(GuardConfig::default())?));
//! let guard = GuardState::new(policy, GuardOptions::new(Source::Query));
//!
//! let app: Router = Router::new()
//!     .route("/preview", get(preview))
//!     .layer(middleware::from_fn_with_state(guard, ssrf_guard_middleware));
//! ```

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes, to_bytes},
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{HeaderName, HeaderValue, StatusCode, Uri, header, request::Parts, uri::PathAndQuery},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ssrf_guard::{SharedPolicy, Verdict, Violation, ViolationCode};
use tracing::debug;

/// Default cap on the request body read for [`Source::Body`].
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Where the candidate URL lives in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// A top-level string field of a JSON object body.
    #[default]
    Body,
    /// A query string parameter.
    Query,
    /// A route path parameter. The middleware must be added with
    /// `route_layer` so the parameters are known.
    Params,
    /// A request header.
    Headers,
}

/// The canonical URL of an allowed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeUrl(pub String);

/// Violations of a denied target, attached when `block_on_error` is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrfViolations(pub Vec<Violation>);

/// Builds the response for a denied target.
pub type ErrorHandler = Arc<dyn Fn(&[Violation]) -> Response + Send + Sync>;

/// Middleware options.
#[derive(Clone)]
pub struct GuardOptions {
    pub source: Source,
    pub key: String,
    pub replace_original: bool,
    pub block_on_error: bool,
    pub status_code: StatusCode,
    pub max_body_bytes: usize,
    pub on_error: Option<ErrorHandler>,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            source: Source::default(),
            key: "url".to_string(),
            replace_original: false,
            block_on_error: true,
            status_code: StatusCode::BAD_REQUEST,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            on_error: None,
        }
    }
}

impl std::fmt::Debug for GuardOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardOptions")
            .field("source", &self.source)
            .field("key", &self.key)
            .field("replace_original", &self.replace_original)
            .field("block_on_error", &self.block_on_error)
            .field("status_code", &self.status_code)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl GuardOptions {
    /// Read the candidate from `source` under the default key `url`.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn replace_original(mut self, replace: bool) -> Self {
        self.replace_original = replace;
        self
    }

    pub fn block_on_error(mut self, block: bool) -> Self {
        self.block_on_error = block;
        self
    }

    pub fn status_code(mut self, status: StatusCode) -> Self {
        self.status_code = status;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn on_error(
        mut self,
        handler: impl Fn(&[Violation]) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// State for [`ssrf_guard_middleware`].
#[derive(Debug, Clone)]
pub struct GuardState {
    policy: Arc<SharedPolicy>,
    options: Arc<GuardOptions>,
}

impl GuardState {
    pub fn new(policy: Arc<SharedPolicy>, options: GuardOptions) -> Self {
        Self {
            policy,
            options: Arc::new(options),
        }
    }

    pub fn policy(&self) -> &Arc<SharedPolicy> {
        &self.policy
    }

    pub fn options(&self) -> &GuardOptions {
        &self.options
    }
}

/// JSON body of a rejected request.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    errors: &'a [Violation],
}

/// The request body after the candidate has been looked for.
enum Payload {
    /// Not read.
    Untouched(Body),
    /// Read; `json` is set if it was valid JSON.
    Read { bytes: Bytes, json: Option<Value> },
    /// Could not be read (too large or broken).
    Lost,
}

impl Payload {
    fn into_body(self) -> Body {
        match self {
            Payload::Untouched(body) => body,
            Payload::Read { bytes, .. } => Body::from(bytes),
            Payload::Lost => Body::empty(),
        }
    }
}

/// SSRF guard middleware.
pub async fn ssrf_guard_middleware(
    State(guard): State<GuardState>,
    request: Request,
    next: Next,
) -> Response {
    let options = guard.options();
    let (mut parts, body) = request.into_parts();

    let (candidate, mut payload) = extract_candidate(&mut parts, body, options).await;

    let verdict = match &candidate {
        Some(raw) => guard.policy().evaluate(raw).await,
        None => {
            debug!(source = ?options.source, key = %options.key, "No string candidate in request");
            Verdict::Denied(vec![Violation::new(ViolationCode::InvalidInput)])
        }
    };

    match verdict {
        Verdict::Allowed(url) => {
            if options.replace_original {
                replace_original(&mut parts, &mut payload, options, &url);
            }
            parts.extensions.insert(SafeUrl(url));
            next.run(Request::from_parts(parts, payload.into_body()))
                .await
        }
        Verdict::Denied(violations) => {
            if let Some(handler) = &options.on_error {
                return handler(&violations);
            }
            if options.block_on_error {
                return (
                    options.status_code,
                    Json(ErrorBody {
                        errors: &violations,
                    }),
                )
                    .into_response();
            }
            parts.extensions.insert(SsrfViolations(violations));
            next.run(Request::from_parts(parts, payload.into_body()))
                .await
        }
    }
}

async fn extract_candidate(
    parts: &mut Parts,
    body: Body,
    options: &GuardOptions,
) -> (Option<String>, Payload) {
    let key = options.key.as_str();

    match options.source {
        Source::Body => {
            let bytes = match to_bytes(body, options.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "Failed to read request body");
                    return (None, Payload::Lost);
                }
            };
            let json = serde_json::from_slice::<Value>(&bytes).ok();
            let candidate = json
                .as_ref()
                .and_then(|json| json.get(key))
                .and_then(Value::as_str)
                .map(str::to_string);
            (candidate, Payload::Read { bytes, json })
        }
        Source::Query => {
            let values: Vec<String> = parts
                .uri
                .query()
                .map(|query| {
                    url::form_urlencoded::parse(query.as_bytes())
                        .filter(|(name, _)| name.as_ref() == key)
                        .map(|(_, value)| value.into_owned())
                        .collect()
                })
                .unwrap_or_default();
            (single(values, options), Payload::Untouched(body))
        }
        Source::Params => {
            let candidate = match RawPathParams::from_request_parts(parts, &()).await {
                Ok(params) => params
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| value.to_string()),
                Err(e) => {
                    debug!(error = %e, "No path parameters; is the guard a route_layer?");
                    None
                }
            };
            (candidate, Payload::Untouched(body))
        }
        Source::Headers => {
            let values: Vec<String> = parts
                .headers
                .get_all(key)
                .iter()
                .map(|value| value.to_str().map(str::to_string))
                .collect::<Result<_, _>>()
                .unwrap_or_default();
            (single(values, options), Payload::Untouched(body))
        }
    }
}

/// The candidate when `key` occurs exactly once. Handlers disagree on which
/// of several occurrences wins, so a repeated key has no candidate.
fn single(mut values: Vec<String>, options: &GuardOptions) -> Option<String> {
    if values.len() > 1 {
        debug!(
            source = ?options.source,
            key = %options.key,
            count = values.len(),
            "Candidate key repeated"
        );
        return None;
    }
    values.pop()
}

/// Write the canonical URL back where the candidate came from. Path
/// parameters cannot be rewritten and are left alone.
fn replace_original(parts: &mut Parts, payload: &mut Payload, options: &GuardOptions, url: &str) {
    let key = options.key.as_str();

    match options.source {
        Source::Body => {
            if let Payload::Read {
                bytes,
                json: Some(json),
            } = payload
            {
                if let Some(field) = json.get_mut(key) {
                    *field = Value::String(url.to_string());
                }
                match serde_json::to_vec(json) {
                    Ok(encoded) => {
                        parts
                            .headers
                            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
                        *bytes = Bytes::from(encoded);
                    }
                    Err(e) => debug!(error = %e, "Failed to re-encode body"),
                }
            }
        }
        Source::Query => match replace_query_param(&parts.uri, key, url) {
            Some(uri) => parts.uri = uri,
            None => debug!(key, "Failed to rewrite query parameter"),
        },
        Source::Headers => {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(key), HeaderValue::from_str(url)) {
                parts.headers.insert(name, value);
            }
        }
        Source::Params => {}
    }
}

fn replace_query_param(uri: &Uri, key: &str, value: &str) -> Option<Uri> {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, current) in url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
        if name.as_ref() == key {
            serializer.append_pair(&name, value);
        } else {
            serializer.append_pair(&name, &current);
        }
    }

    let path_and_query = format!("{}?{}", uri.path(), serializer.finish());
    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(uri_parts).ok()
}
