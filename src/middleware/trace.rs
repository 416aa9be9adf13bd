//! Per-request access logging.
//!
//! One log line per request, emitted after the handler finishes:
//!
//! ```text
//! [GET] /users 200 412.3µs
//! ```
//!
//! The line carries the method and path as received, the status that went on
//! the wire, and wall-clock latency. Emission goes through [`tracing`], so
//! whatever subscriber the binary installs decides where the line lands;
//! subscriber failures never reach the request path.

use std::time::Instant;

use tracing::info;

use crate::handler::BoxFuture;
use crate::method::Method;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Access-log middleware.
///
/// Layer it inside [`Cors`](crate::middleware::cors::Cors) so preflight
/// short-circuits stay off the access log, or outside if you want them on
/// the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Trace {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let entry = AccessEntry::begin(&req);
            let response = next.run(req).await;
            entry.finish(&response);
            response
        })
    }
}

/// Captures the request line before the chain consumes the request, and the
/// observed outcome once the response comes back. Consumed by
/// [`AccessEntry::finish`], so each request produces exactly one line.
struct AccessEntry {
    method: Method,
    path: String,
    started: Instant,
}

impl AccessEntry {
    fn begin(req: &Request) -> Self {
        Self {
            method: req.method(),
            path: req.path().to_owned(),
            started: Instant::now(),
        }
    }

    fn finish(self, response: &Response) {
        info!(
            "[{}] {} {} {:?}",
            self.method,
            self.path,
            response.status_code(),
            self.started.elapsed(),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::handler::Handler;
    use crate::status::Status;

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct Capture {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Capture {
            self.clone()
        }
    }

    fn capture() -> (Capture, tracing::subscriber::DefaultGuard) {
        let writer = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer.clone())
            .with_ansi(false)
            .finish();
        (writer, tracing::subscriber::set_default(subscriber))
    }

    async fn run_chain(path: &str) -> Response {
        let terminal = (|req: Request| async move {
            match req.path() {
                "/missing" => Response::status(Status::NotFound),
                _ => Response::text("ok"),
            }
        })
        .into_boxed_handler();
        let req = Request::new(Method::Get, path.to_owned(), Vec::new(), Bytes::new());
        Trace::new().handle(req, Next { inner: terminal }).await
    }

    #[tokio::test]
    async fn one_line_per_request_with_method_path_and_status() {
        let (writer, _guard) = capture();

        let response = run_chain("/users").await;
        assert_eq!(response.status_code(), 200);

        let logged = writer.contents();
        assert_eq!(logged.lines().count(), 1, "expected a single access-log line: {logged:?}");
        assert!(logged.contains("[GET] /users 200"), "unexpected line: {logged:?}");
    }

    #[tokio::test]
    async fn logged_status_follows_the_handler() {
        let (writer, _guard) = capture();

        let response = run_chain("/missing").await;
        assert_eq!(response.status_code(), 404);
        assert!(writer.contents().contains("[GET] /missing 404"));
    }
}
