//! Cross-origin resource sharing.
//!
//! [`Cors`] is built once from a [`CorsPolicy`] and layered onto a
//! [`Router`](crate::router::Router). Preflight requests (`OPTIONS` carrying
//! `Access-Control-Request-Method`) are answered directly and never reach a
//! handler; every other request is forwarded, and the response picks up the
//! access-control headers the policy grants.
//!
//! Responses always carry `Vary: Origin` (preflights additionally vary on the
//! two `Access-Control-Request-*` headers) so shared caches keep per-origin
//! responses apart. A disallowed origin or method is not an error here: the
//! request still runs, the response just carries no grant, and the browser
//! enforces the rest.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::handler::BoxFuture;
use crate::method::Method;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// Declarative CORS rules.
///
/// Origins match case-insensitively and `"*"` in `allowed_origins` admits any
/// origin. Header names in `allowed_headers` are case-insensitive too, and
/// `"*"` there admits any requested header. Methods match case-insensitively
/// as well, and `OPTIONS` always passes the method check. `exposed_headers`
/// is sent verbatim on actual responses so browser scripts may read those
/// headers.
///
/// `debug` turns on a `debug!` line per CORS decision. Useful when a browser
/// reports an opaque CORS failure and the reason is not obvious from the
/// policy.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub debug: bool,
}

impl Default for CorsPolicy {
    /// Any origin, the four basic methods, `Authorization`/`Content-Type`
    /// accepted and `Authorization` readable. Credentials stay off, which is
    /// what makes the wildcard origin legal.
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: vec![Method::Get, Method::Post, Method::Put, Method::Delete],
            allowed_headers: vec!["Authorization".to_owned(), "Content-Type".to_owned()],
            exposed_headers: vec!["Authorization".to_owned()],
            allow_credentials: false,
            debug: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CorsError {
    /// Browsers reject `Access-Control-Allow-Origin: *` on credentialed
    /// requests, so a policy combining the two can never work and is refused
    /// up front.
    #[error("allow_credentials cannot be combined with a wildcard origin")]
    CredentialsWithWildcardOrigin,
}

/// The middleware itself. Cheap to clone; the compiled policy is shared.
#[derive(Clone)]
pub struct Cors {
    inner: Arc<Compiled>,
}

impl Cors {
    /// Validates and compiles a policy.
    ///
    /// ```
    /// use keel::middleware::cors::{Cors, CorsPolicy};
    ///
    /// let policy = CorsPolicy { allow_credentials: true, ..CorsPolicy::default() };
    /// assert!(Cors::new(policy).is_err());
    /// ```
    pub fn new(policy: CorsPolicy) -> Result<Self, CorsError> {
        let wildcard = policy.allowed_origins.iter().any(|origin| origin == "*");
        if wildcard && policy.allow_credentials {
            return Err(CorsError::CredentialsWithWildcardOrigin);
        }

        let origins = if wildcard {
            Origins::Any
        } else {
            Origins::List(policy.allowed_origins)
        };
        let expose_value = if policy.exposed_headers.is_empty() {
            None
        } else {
            Some(policy.exposed_headers.join(", "))
        };

        Ok(Self {
            inner: Arc::new(Compiled {
                origins,
                allowed_methods: policy.allowed_methods,
                allowed_headers: policy
                    .allowed_headers
                    .iter()
                    .map(|name| name.to_ascii_lowercase())
                    .collect(),
                expose_value,
                allow_credentials: policy.allow_credentials,
                debug: policy.debug,
            }),
        })
    }
}

impl Middleware for Cors {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let rules = Arc::clone(&self.inner);
        Box::pin(async move {
            let preflight = req.method() == Method::Options
                && req.header("access-control-request-method").is_some();
            if preflight {
                rules.preflight(&req)
            } else {
                rules.actual(req, next).await
            }
        })
    }
}

enum Origins {
    Any,
    List(Vec<String>),
}

impl Origins {
    fn allows(&self, origin: &str) -> bool {
        match self {
            Origins::Any => true,
            Origins::List(list) => list.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

/// Policy after validation, in lookup-ready form.
struct Compiled {
    origins: Origins,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    expose_value: Option<String>,
    allow_credentials: bool,
    debug: bool,
}

impl Compiled {
    /// Answers a preflight without touching the handler chain. The response
    /// is `204 No Content` either way; only an allowed probe gets the
    /// `Access-Control-Allow-*` grant.
    fn preflight(&self, req: &Request) -> Response {
        let mut response = Response::status(Status::NoContent);
        response.append_header("vary", "Origin");
        response.append_header("vary", "Access-Control-Request-Method");
        response.append_header("vary", "Access-Control-Request-Headers");

        let Some(origin) = req.header("origin") else {
            self.note(req, "preflight without an origin header");
            return response;
        };
        if !self.origins.allows(origin) {
            self.note(req, "preflight origin not allowed");
            return response;
        }
        let Some(requested_method) = req.header("access-control-request-method") else {
            return response;
        };
        // Browsers send the requested method as-is, without normalising its
        // case, so `patch` must match an allowed `PATCH`.
        let Ok(method) = requested_method.to_ascii_uppercase().parse::<Method>() else {
            self.note(req, "preflight method not recognised");
            return response;
        };
        if !self.method_allowed(method) {
            self.note(req, "preflight method not allowed");
            return response;
        }
        let requested_headers = req.header("access-control-request-headers").unwrap_or("");
        if !self.headers_allowed(requested_headers) {
            self.note(req, "preflight header not allowed");
            return response;
        }

        response.append_header("access-control-allow-origin", self.origin_value(origin));
        response.append_header("access-control-allow-methods", method.as_str());
        if !requested_headers.is_empty() {
            response.append_header("access-control-allow-headers", requested_headers);
        }
        if self.allow_credentials {
            response.append_header("access-control-allow-credentials", "true");
        }
        self.note(req, "preflight allowed");
        response
    }

    /// Runs the rest of the chain, then decorates the response. The grant
    /// needs both an allowed origin and an allowed method, and is decided up
    /// front because the chain consumes the request.
    async fn actual(&self, req: Request, next: Next) -> Response {
        let grant = match req.header("origin") {
            Some(origin) if !self.origins.allows(origin) => {
                self.note(&req, "origin not allowed, response carries no grant");
                None
            }
            Some(_) if !self.method_allowed(req.method()) => {
                self.note(&req, "method not allowed, response carries no grant");
                None
            }
            Some(origin) => {
                self.note(&req, "origin allowed");
                Some(self.origin_value(origin).to_owned())
            }
            // Same-origin or a non-browser client.
            None => None,
        };

        let mut response = next.run(req).await;
        response.append_header("vary", "Origin");
        if let Some(origin_value) = grant {
            response.append_header("access-control-allow-origin", origin_value);
            if let Some(expose) = &self.expose_value {
                response.append_header("access-control-expose-headers", expose.clone());
            }
            if self.allow_credentials {
                response.append_header("access-control-allow-credentials", "true");
            }
        }
        response
    }

    /// What goes into `Access-Control-Allow-Origin`: the literal `*` for a
    /// wildcard policy, otherwise the request's own origin echoed back.
    fn origin_value<'a>(&self, origin: &'a str) -> &'a str {
        match self.origins {
            Origins::Any => "*",
            Origins::List(_) => origin,
        }
    }

    /// `OPTIONS` passes whatever `allowed_methods` says, so preflights and
    /// bare `OPTIONS` probes keep working under any policy.
    fn method_allowed(&self, method: Method) -> bool {
        method == Method::Options || self.allowed_methods.contains(&method)
    }

    /// `requested` is the raw `Access-Control-Request-Headers` value, a
    /// comma-separated list of header names.
    fn headers_allowed(&self, requested: &str) -> bool {
        if self.allowed_headers.iter().any(|name| name == "*") {
            return true;
        }
        requested
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .all(|name| {
                let name = name.to_ascii_lowercase();
                self.allowed_headers.contains(&name)
            })
    }

    fn note(&self, req: &Request, decision: &str) {
        if self.debug {
            debug!(method = %req.method(), path = req.path(), "cors: {decision}");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::handler::Handler;

    fn request(method: Method, headers: &[(&str, &str)]) -> Request {
        let headers = headers
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        Request::new(method, "/users".to_owned(), headers, Bytes::new())
    }

    fn chain() -> Next {
        Next {
            inner: (|_req: Request| async move { Response::text("routed") }).into_boxed_handler(),
        }
    }

    async fn apply(policy: CorsPolicy, req: Request) -> Response {
        Cors::new(policy).unwrap().handle(req, chain()).await
    }

    #[test]
    fn wildcard_with_credentials_is_rejected() {
        let policy = CorsPolicy { allow_credentials: true, ..CorsPolicy::default() };
        assert!(matches!(
            Cors::new(policy),
            Err(CorsError::CredentialsWithWildcardOrigin)
        ));
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_policy_headers() {
        let req = request(
            Method::Options,
            &[
                ("Origin", "https://app.example"),
                ("Access-Control-Request-Method", "POST"),
                ("Access-Control-Request-Headers", "Content-Type, Authorization"),
            ],
        );

        let response = apply(CorsPolicy::default(), req).await;

        assert_eq!(response.status_code(), 204);
        assert!(response.body().is_empty(), "preflight must not reach the handler");
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(response.header("access-control-allow-methods"), Some("POST"));
        assert_eq!(
            response.header("access-control-allow-headers"),
            Some("Content-Type, Authorization")
        );
        assert!(response.header("access-control-allow-credentials").is_none());
    }

    #[tokio::test]
    async fn preflight_with_disallowed_method_carries_no_grant() {
        let req = request(
            Method::Options,
            &[
                ("Origin", "https://app.example"),
                ("Access-Control-Request-Method", "PATCH"),
            ],
        );

        let response = apply(CorsPolicy::default(), req).await;

        assert_eq!(response.status_code(), 204);
        assert!(response.header("access-control-allow-origin").is_none());
        assert_eq!(response.header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn requested_header_outside_the_allow_list_fails_preflight() {
        let req = request(
            Method::Options,
            &[
                ("Origin", "https://app.example"),
                ("Access-Control-Request-Method", "POST"),
                ("Access-Control-Request-Headers", "x-secret-token"),
            ],
        );

        let response = apply(CorsPolicy::default(), req).await;

        assert_eq!(response.status_code(), 204);
        assert!(response.header("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn options_without_request_method_is_forwarded() {
        let req = request(Method::Options, &[("Origin", "https://app.example")]);

        let response = apply(CorsPolicy::default(), req).await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body(), b"routed");
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn actual_request_gains_access_control_headers() {
        let req = request(Method::Get, &[("Origin", "https://app.example")]);

        let response = apply(CorsPolicy::default(), req).await;

        assert_eq!(response.body(), b"routed");
        assert_eq!(response.header("vary"), Some("Origin"));
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            response.header("access-control-expose-headers"),
            Some("Authorization")
        );
    }

    #[tokio::test]
    async fn disallowed_origin_is_forwarded_without_headers() {
        let policy = CorsPolicy {
            allowed_origins: vec!["https://app.example".to_owned()],
            ..CorsPolicy::default()
        };
        let req = request(Method::Get, &[("Origin", "https://evil.example")]);

        let response = apply(policy, req).await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body(), b"routed");
        assert!(response.header("access-control-allow-origin").is_none());
        assert_eq!(response.header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn listed_origin_is_echoed_with_credentials() {
        let policy = CorsPolicy {
            allowed_origins: vec!["https://app.example".to_owned()],
            allow_credentials: true,
            ..CorsPolicy::default()
        };
        let req = request(Method::Get, &[("Origin", "HTTPS://APP.EXAMPLE")]);

        let response = apply(policy, req).await;

        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("HTTPS://APP.EXAMPLE")
        );
        assert_eq!(response.header("access-control-allow-credentials"), Some("true"));
    }

    #[tokio::test]
    async fn actual_request_with_disallowed_method_carries_no_grant() {
        let policy = CorsPolicy {
            allowed_methods: vec![Method::Post],
            ..CorsPolicy::default()
        };
        let req = request(Method::Get, &[("Origin", "https://app.example")]);

        let response = apply(policy, req).await;

        assert_eq!(response.body(), b"routed", "the request itself still runs");
        assert!(response.header("access-control-allow-origin").is_none());
        assert!(response.header("access-control-expose-headers").is_none());
        assert_eq!(response.header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn preflight_method_match_is_case_insensitive() {
        let policy = CorsPolicy {
            allowed_methods: vec![Method::Patch],
            ..CorsPolicy::default()
        };
        let req = request(
            Method::Options,
            &[
                ("Origin", "https://app.example"),
                ("Access-Control-Request-Method", "patch"),
            ],
        );

        let response = apply(policy, req).await;

        assert_eq!(response.status_code(), 204);
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(response.header("access-control-allow-methods"), Some("PATCH"));
    }
}
