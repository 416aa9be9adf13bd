//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. Two are built in:
//!
//! - [`trace`] — one access-log line per request (method, path, status, latency)
//! - [`cors`] — cross-origin policy enforcement ahead of the router
//!
//! A middleware wraps everything after it. [`Router::layer`](crate::Router::layer)
//! pushes onto an ordered list and the layer added last runs outermost, so
//! the reference composition is:
//!
//! ```rust,no_run
//! use keel::middleware::cors::{Cors, CorsPolicy};
//! use keel::middleware::trace::Trace;
//! use keel::Router;
//!
//! # fn demo() -> Result<(), keel::middleware::cors::CorsError> {
//! let app = Router::new()
//!     .layer(Trace::new())
//!     .layer(Cors::new(CorsPolicy::default())?);
//! # Ok(())
//! # }
//! ```
//!
//! With CORS outermost, preflight probes short-circuit before the access log
//! ever sees them.
//!
//! # Writing your own
//!
//! ```rust
//! use keel::middleware::{Middleware, Next};
//! use keel::{BoxFuture, Request};
//!
//! struct ServerHeader;
//!
//! impl Middleware for ServerHeader {
//!     fn handle(&self, req: Request, next: Next) -> BoxFuture {
//!         Box::pin(async move {
//!             let mut response = next.run(req).await;
//!             response.append_header("server", "keel");
//!             response
//!         })
//!     }
//! }
//! ```

pub mod cors;
pub mod trace;

use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::Response;

/// A request/response interceptor.
///
/// Implementations receive the request and a [`Next`] representing the rest
/// of the chain. They may respond directly (short-circuit), or call
/// `next.run(req).await` and decorate the response on the way out.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// The remainder of the chain, ending at the router dispatch.
pub struct Next {
    pub(crate) inner: BoxedHandler,
}

impl Next {
    /// Delegates to the rest of the chain and resolves to its response.
    pub async fn run(self, req: Request) -> Response {
        self.inner.call(req).await
    }
}

/// One folded link of the chain: a layer wrapped around everything after it.
pub(crate) struct Layered {
    pub(crate) layer: Box<dyn Middleware>,
    pub(crate) next: BoxedHandler,
}

impl ErasedHandler for Layered {
    fn call(&self, req: Request) -> BoxFuture {
        self.layer.handle(req, Next { inner: Arc::clone(&self.next) })
    }
}
