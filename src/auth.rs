//! Authentication boundary
//!
//! The accept loop hands every parsed request to an [`Authenticator`],
//! which either yields the validated `(client_id, user_id)` pair for
//! registration or an HTTP error response to write back. The real
//! credential store lives behind this trait; the proxy core never sees
//! credentials.

use async_trait::async_trait;

use crate::registry::{ClientId, UserId};
use crate::server::request::HttpRequest;
use crate::server::response::HttpResponse;

/// Validated identity for a connection attempt
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: ClientId,
    pub user_id: UserId,
}

/// Result of authenticating a connection attempt
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Proceed to registration
    Accept(Credentials),
    /// Write this response and close; no registry mutation
    Reject(HttpResponse),
}

/// Validates inbound SSE subscription requests
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, request: &HttpRequest) -> AuthOutcome;
}

/// Header-based authenticator
///
/// Accepts `GET /events` carrying a numeric `X-User-Id` header, taking
/// the client id from `X-Client-Id` or generating one. This stands in
/// for a credential-store-backed implementation deployed behind a
/// trusted edge that injects the identity headers.
#[derive(Debug, Default)]
pub struct HeaderAuthenticator;

impl HeaderAuthenticator {
    pub const PATH: &'static str = "/events";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for HeaderAuthenticator {
    async fn authenticate(&self, request: &HttpRequest) -> AuthOutcome {
        if request.path() != Self::PATH {
            return AuthOutcome::Reject(HttpResponse::not_found("no such stream\n"));
        }
        if request.method != "GET" {
            return AuthOutcome::Reject(HttpResponse::method_not_allowed(
                "SSE subscriptions are GET only\n",
            ));
        }

        let user_id: UserId = match request.header("x-user-id").map(str::parse) {
            Some(Ok(id)) => id,
            Some(Err(_)) => {
                return AuthOutcome::Reject(HttpResponse::bad_request(
                    "X-User-Id must be an integer\n",
                ))
            }
            None => {
                return AuthOutcome::Reject(HttpResponse::unauthorized(
                    "missing X-User-Id header\n",
                ))
            }
        };

        let client_id = match request.header("x-client-id") {
            Some(id) if !id.is_empty() => ClientId::new(id),
            _ => ClientId::generate(),
        };

        AuthOutcome::Accept(Credentials { client_id, user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(head: &str) -> HttpRequest {
        HttpRequest::parse(head).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_valid_request() {
        let auth = HeaderAuthenticator::new();
        let req = request("GET /events HTTP/1.1\r\nX-User-Id: 42\r\nX-Client-Id: abc\r\n\r\n");

        match auth.authenticate(&req).await {
            AuthOutcome::Accept(creds) => {
                assert_eq!(creds.client_id, ClientId::new("abc"));
                assert_eq!(creds.user_id, 42);
            }
            AuthOutcome::Reject(resp) => panic!("rejected with {}", resp.status()),
        }
    }

    #[tokio::test]
    async fn test_generates_client_id_when_absent() {
        let auth = HeaderAuthenticator::new();
        let req = request("GET /events HTTP/1.1\r\nX-User-Id: 42\r\n\r\n");

        let AuthOutcome::Accept(creds) = auth.authenticate(&req).await else {
            panic!("expected accept");
        };
        assert!(!creds.client_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_missing_user_id() {
        let auth = HeaderAuthenticator::new();
        let req = request("GET /events HTTP/1.1\r\n\r\n");

        let AuthOutcome::Reject(resp) = auth.authenticate(&req).await else {
            panic!("expected reject");
        };
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn test_rejects_non_numeric_user_id() {
        let auth = HeaderAuthenticator::new();
        let req = request("GET /events HTTP/1.1\r\nX-User-Id: bob\r\n\r\n");

        let AuthOutcome::Reject(resp) = auth.authenticate(&req).await else {
            panic!("expected reject");
        };
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_rejects_wrong_path_and_method() {
        let auth = HeaderAuthenticator::new();

        let AuthOutcome::Reject(resp) =
            auth.authenticate(&request("GET /other HTTP/1.1\r\nX-User-Id: 1\r\n\r\n")).await
        else {
            panic!("expected reject");
        };
        assert_eq!(resp.status(), 404);

        let AuthOutcome::Reject(resp) =
            auth.authenticate(&request("POST /events HTTP/1.1\r\nX-User-Id: 1\r\n\r\n")).await
        else {
            panic!("expected reject");
        };
        assert_eq!(resp.status(), 405);
    }
}
