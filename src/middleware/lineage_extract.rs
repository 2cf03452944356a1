//! Extracts `X-External-*` headers into an [`ExternalIdentity`] so external
//! agent invocations can be traced back to the calling system's own user,
//! not just the API key that authenticated the request (§4.7).

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::models::lineage::ExternalIdentity;

pub async fn extract(mut req: Request, next: Next) -> Response {
    let identity = from_headers(req.headers());
    if identity != ExternalIdentity::default() {
        req.extensions_mut().insert(identity);
    }
    next.run(req).await
}

fn from_headers(headers: &HeaderMap) -> ExternalIdentity {
    ExternalIdentity {
        user_id: header_str(headers, "x-external-user-id"),
        user_email: header_str(headers, "x-external-user-email"),
        user_name: header_str(headers, "x-external-user-name"),
        system: header_str(headers, "x-external-system"),
        session_id: header_str(headers, "x-external-session-id"),
        trace_id: header_str(headers, "x-external-trace-id"),
        context: header_str(headers, "x-external-context")
            .and_then(|raw| serde_json::from_str(&raw).ok()),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_present_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-external-user-id", HeaderValue::from_static("u-1"));
        headers.insert("x-external-system", HeaderValue::from_static("teams"));
        let identity = from_headers(&headers);
        assert_eq!(identity.user_id.as_deref(), Some("u-1"));
        assert_eq!(identity.system.as_deref(), Some("teams"));
        assert_eq!(identity.user_email, None);
    }

    #[test]
    fn invalid_context_json_is_dropped_not_errored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-external-context", HeaderValue::from_static("not json"));
        assert_eq!(from_headers(&headers).context, None);
    }

    #[test]
    fn valid_context_json_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-external-context", HeaderValue::from_static(r#"{"k":"v"}"#));
        assert_eq!(
            from_headers(&headers).context,
            Some(serde_json::json!({"k": "v"}))
        );
    }
}
