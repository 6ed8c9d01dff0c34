//! Span factory for dispatched requests.

use tracing::{info_span, Span};
use uuid::Uuid;

/// Factory for creating standardized request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Create a new request span with standard fields.
    ///
    /// `status` is filled in when the reply is staged.
    pub fn new(request_id: &Uuid, method: &str, uri: &str) -> Span {
        info_span!(
            "http_request",
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = tracing::field::Empty,
        )
    }
}
