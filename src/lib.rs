//! # keel
//!
//! A minimal HTTP server shell for Rust services behind a reverse proxy.
//!
//! ## The contract
//!
//! nginx handles TLS, rate limiting, slow clients, and body-size limits.
//! keel does not — by design. The proxy does proxy things. The server does
//! server things. What's left here is the part that actually changes between
//! applications:
//!
//! - Radix-tree routing — O(path-length) lookup via [`matchit`]
//! - Explicit middleware — access logging and CORS are layers you compose in
//!   code, in an order you can read; no global registry
//! - Lifecycle — bind, serve, drain; SIGTERM / Ctrl-C starts a drain bounded
//!   by a grace period, and even a forced stop is an orderly exit
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::middleware::cors::{Cors, CorsPolicy};
//! use keel::middleware::trace::Trace;
//! use keel::{Request, Response, Router, Server, ServerConfig, Status};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cors = Cors::new(CorsPolicy::default())?;
//!
//!     let app = Router::new()
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user)
//!         .layer(Trace::new())
//!         .layer(cors);
//!
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(Status::BadRequest);
//!     }
//!     Response::builder()
//!         .status(Status::Created)
//!         .header("location", "/users/99")
//!         .json(req.body().to_vec())
//! }
//! ```

mod config;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod middleware;
pub mod user;

pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use method::Method;
pub use request::Request;
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::{Server, Shutdown};
pub use status::Status;
