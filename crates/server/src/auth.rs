//! Caller identity and ACL checks.
//!
//! Authentication happens upstream: a trusted front proxy puts the caller's
//! name in the configured identity header. Requests without it are anonymous.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use shoal_core::{Node, Right};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Maximum length of a caller name taken from the identity header.
const MAX_IDENTITY_LEN: usize = 256;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, dropping non-printable characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The caller of a request; `None` is anonymous.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Caller(pub Option<String>);

impl Caller {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Require `right` on `node`.
    ///
    /// Anonymous callers get `Unauthorized` so they know to identify
    /// themselves; known callers get `Forbidden`.
    pub fn authorize(&self, node: &Node, right: Right) -> ApiResult<()> {
        if node.acl.allows(right, self.name()) {
            return Ok(());
        }
        let right = match right {
            Right::Read => "read",
            Right::Write => "write",
            Right::Delete => "delete",
        };
        match self.name() {
            None => Err(ApiError::Unauthorized(format!(
                "{right} access to node {} requires a caller identity",
                node.id
            ))),
            Some(name) => Err(ApiError::Forbidden(format!(
                "{name} has no {right} access to node {}",
                node.id
            ))),
        }
    }
}

fn extract_caller(req: &Request, header: &str) -> ApiResult<Caller> {
    let Some(value) = req.headers().get(header) else {
        return Ok(Caller::anonymous());
    };
    let name = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{header} must be visible ASCII")))?
        .trim();
    if name.is_empty() {
        return Ok(Caller::anonymous());
    }
    if name.len() > MAX_IDENTITY_LEN || name.chars().any(|c| c.is_ascii_control()) {
        return Err(ApiError::BadRequest(format!("invalid {header} value")));
    }
    Ok(Caller(Some(name.to_string())))
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Resolve the caller and trace id and run the request inside a span carrying both.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let caller = extract_caller(&req, &state.config.server.identity_header)?;
    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        caller = caller.name().unwrap_or("-"),
    );

    req.extensions_mut().insert(trace_id);
    req.extensions_mut().insert(caller);
    Ok(next.run(req).instrument(span).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("x-shoal-user", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_missing_or_blank_identity_is_anonymous() {
        assert_eq!(extract_caller(&request(None), "x-shoal-user").unwrap(), Caller::anonymous());
        assert_eq!(
            extract_caller(&request(Some("  ")), "x-shoal-user").unwrap(),
            Caller::anonymous()
        );
        assert_eq!(
            extract_caller(&request(Some("alice")), "x-shoal-user").unwrap(),
            Caller(Some("alice".into()))
        );
    }

    #[test]
    fn test_trace_id_is_sanitized() {
        let id = TraceId::from_client("abc\u{7}def");
        assert_eq!(id.as_str(), "abcdef");
        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);
    }

    #[test]
    fn test_authorize_distinguishes_anonymous_from_known_callers() {
        let node = Node::new(Some("alice"));
        assert!(Caller(Some("alice".into())).authorize(&node, Right::Delete).is_ok());
        assert!(matches!(
            Caller::anonymous().authorize(&node, Right::Read),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            Caller(Some("bob".into())).authorize(&node, Right::Read),
            Err(ApiError::Forbidden(_))
        ));
    }
}
