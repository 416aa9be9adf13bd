//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Middleware is explicit:
//! layers are handed to the router one by one and wrap the whole table, the
//! last layer added sitting outermost. No global registry decides the order.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Layered, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// The application router.
///
/// One radix tree per HTTP method — O(path-length) lookup, no allocations on
/// the hot path. Build it once at startup; pass it to [`Server::serve`].
/// Each registration returns `self` so the whole app chains naturally.
///
/// [`Server::serve`]: crate::server::Server::serve
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    layers: Vec<Box<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), layers: Vec::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use keel::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Delete, "/users/{id}", delete_user)
    ///     .on(Method::Get,    "/users/{id}", get_user)
    ///     .on(Method::Post,   "/users",      create_user);
    /// ```
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler)
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, path, handler)
    }

    /// Wrap the router in `middleware`. May be called repeatedly; the last
    /// layer added runs first on the way in and last on the way out.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Box::new(middleware));
        self
    }

    fn add(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Collapse the table and its layers into a single callable chain.
    pub(crate) fn into_handler(self) -> BoxedHandler {
        let mut handler: BoxedHandler = Arc::new(RouteTable { routes: self.routes });
        for layer in self.layers {
            handler = Arc::new(Layered { layer, next: handler });
        }
        handler
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Innermost link of the chain: resolves a route and runs its handler.
/// Anything unmatched — wrong path or wrong method — is a `404` here,
/// without entering any handler.
struct RouteTable {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl RouteTable {
    fn lookup(&self, method: Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl ErasedHandler for RouteTable {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.set_params(params);
                handler.call(req)
            }
            None => Box::pin(async { Response::status(Status::NotFound) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::middleware::Next;

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, path.to_owned(), Vec::new(), Bytes::new())
    }

    #[tokio::test]
    async fn dispatch_matches_method_and_path() {
        let app = Router::new()
            .get("/users", |_req: Request| async { Response::text("list") })
            .post("/users", |_req: Request| async { Response::text("create") })
            .into_handler();

        let got = app.call(request(Method::Get, "/users")).await;
        assert_eq!(got.body(), b"list");

        let got = app.call(request(Method::Post, "/users")).await;
        assert_eq!(got.body(), b"create");
    }

    #[tokio::test]
    async fn unmatched_requests_are_404() {
        let app = Router::new()
            .get("/users", |_req: Request| async { Response::text("list") })
            .into_handler();

        let missing_path = app.call(request(Method::Get, "/teams")).await;
        assert_eq!(missing_path.status_code(), 404);

        let missing_method = app.call(request(Method::Delete, "/users")).await;
        assert_eq!(missing_method.status_code(), 404);
    }

    #[tokio::test]
    async fn route_params_reach_the_handler() {
        let app = Router::new()
            .get("/users/{id}", |req: Request| async move {
                Response::text(req.param("id").unwrap_or("?"))
            })
            .into_handler();

        let got = app.call(request(Method::Get, "/users/42")).await;
        assert_eq!(got.body(), b"42");
    }

    #[tokio::test]
    async fn last_layer_added_runs_outermost() {
        struct Tag(&'static str);

        impl Middleware for Tag {
            fn handle(&self, req: Request, next: Next) -> BoxFuture {
                let tag = self.0;
                Box::pin(async move {
                    let mut response = next.run(req).await;
                    response.append_header("x-order", tag);
                    response
                })
            }
        }

        let app = Router::new()
            .get("/", |_req: Request| async { Response::text("ok") })
            .layer(Tag("inner"))
            .layer(Tag("outer"))
            .into_handler();

        let got = app.call(request(Method::Get, "/")).await;
        let order: Vec<&str> = got
            .headers()
            .iter()
            .filter(|(name, _)| name == "x-order")
            .map(|(_, value)| value.as_str())
            .collect();

        // The inner layer finishes first, so its header lands first.
        assert_eq!(order, ["inner", "outer"]);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic() {
        let _ = Router::new()
            .get("/users/{id}", |_req: Request| async { Response::text("a") })
            .get("/users/{name}", |_req: Request| async { Response::text("b") });
    }
}
