//! HTTP server and graceful shutdown.
//!
//! The lifecycle is linear: bind, serve, drain, stop. [`Server::bind`] owns
//! the listener, so a port that cannot be claimed fails right there instead
//! of surfacing later mid-accept. [`Server::serve`] runs until a shutdown
//! signal arrives; [`Server::serve_until`] takes any future as the trigger,
//! which is how the tests drive shutdown without sending process signals.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections are made.
//! 2. Letting in-flight requests finish, bounded by
//!    [`ServerConfig::shutdown_grace`].
//! 3. Aborting whatever is still running once the grace period lapses.
//!
//! Both outcomes are orderly exits: [`Shutdown::Forced`] is reported in the
//! return value and the log, not as an error. Set
//! `terminationGracePeriodSeconds` in your pod spec to a value longer than
//! the grace period so the abort path stays in our hands rather than the
//! kernel's.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::status::Status;

/// How a serve call came to return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shutdown {
    /// Every in-flight request finished inside the grace period.
    Clean,
    /// The grace period lapsed with requests still running; they were
    /// aborted. Still an orderly exit — the abort is recorded in the log,
    /// not in the exit code.
    Forced,
}

/// The HTTP server. Holds the bound listener between [`Server::bind`] and
/// [`Server::serve`].
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds the listener at `config.addr`.
    ///
    /// Binding is the one failure that has no fallback, so it happens here,
    /// eagerly, and the error names the address that could not be claimed.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn demo() -> Result<(), keel::Error> {
    /// use keel::{Server, ServerConfig};
    /// let server = Server::bind(ServerConfig::default()).await?;
    /// # Ok(()) }
    /// ```
    pub async fn bind(config: ServerConfig) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| Error::Bind { addr: config.addr, source })?;
        Ok(Self { listener, config })
    }

    /// The address actually bound. Differs from `config.addr` when binding
    /// port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns after shutdown completes (SIGTERM or Ctrl-C, followed by the
    /// drain described in the module docs).
    pub async fn serve(self, router: Router) -> Result<Shutdown, Error> {
        self.serve_until(router, shutdown_signal()).await
    }

    /// Like [`Server::serve`], but draining begins when `shutdown` resolves
    /// instead of on a process signal.
    pub async fn serve_until<F>(self, router: Router, shutdown: F) -> Result<Shutdown, Error>
    where
        F: Future<Output = ()> + Send,
    {
        let Self { listener, config } = self;
        let app = router.into_handler();

        let addr = listener.local_addr()?;
        info!(addr = %addr, "server listening");

        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(config.read_timeout);

        // JoinSet tracks every spawned connection task so shutdown can wait
        // for them all, or abort them when the grace period lapses.
        let mut tasks = tokio::task::JoinSet::new();
        let graceful = GracefulShutdown::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` makes select! check arms top-to-bottom instead of
                // randomly. Shutdown is checked first so a signal stops new
                // connections even when more are queued on the socket.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = app.clone();
                    let write_timeout = config.write_timeout;
                    // `service_fn` turns a plain async function into a hyper
                    // `Service`. Called once per request, not per connection.
                    let svc = service_fn(move |req| {
                        let app = app.clone();
                        async move { dispatch(app, req, write_timeout).await }
                    });

                    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the
                    // hyper IO traits; the idle guard sits underneath so it
                    // sees every byte in both directions.
                    let io = TokioIo::new(IdleTimeout::new(stream, config.idle_timeout));

                    // `auto::Builder` handles both HTTP/1.1 and HTTP/2,
                    // whatever the client negotiates. The graceful handle
                    // tells the connection to stop taking new requests once
                    // shutdown starts.
                    let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            if is_idle_close(e.as_ref()) {
                                debug!(peer = %remote_addr, "connection closed after idle timeout");
                            } else {
                                error!(peer = %remote_addr, "connection error: {e}");
                            }
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // No new connections from here on.
        drop(listener);

        let outcome = tokio::select! {
            () = graceful.shutdown() => {
                while tasks.join_next().await.is_some() {}
                info!("shutdown complete");
                Shutdown::Clean
            }
            () = tokio::time::sleep(config.shutdown_grace) => {
                warn!(aborted = tasks.len(), "grace period elapsed, forcing shutdown");
                tasks.shutdown().await;
                Shutdown::Forced
            }
        };

        Ok(outcome)
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: routes one request and produces one response.
///
/// The error type is [`Infallible`](std::convert::Infallible) — every failure
/// becomes a status code here (405, 400, 504) so hyper never sees an error.
async fn dispatch(
    app: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
    write_timeout: Duration,
) -> Result<http::Response<http_body_util::Full<bytes::Bytes>>, std::convert::Infallible> {
    let (parts, body) = req.into_parts();

    // Methods outside the supported set never enter the pipeline.
    let Ok(method) = parts.method.as_str().parse::<Method>() else {
        return Ok(Response::status(Status::MethodNotAllowed).into_http());
    };
    let path = parts.uri.path().to_owned();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(method = %method, path = %path, "failed to read request body: {e}");
            return Ok(Response::status(Status::BadRequest).into_http());
        }
    };

    let request = Request::new(method, path.clone(), headers, body);
    let response = match tokio::time::timeout(write_timeout, app.call(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(method = %method, path = %path, "request exceeded the write deadline");
            Response::status(Status::GatewayTimeout)
        }
    };

    Ok(response.into_http())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

/// Whether a connection error bottoms out in the idle guard's timeout.
/// Those closes are routine, so they log at `debug` rather than `error`.
fn is_idle_close(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return io_err.kind() == io::ErrorKind::TimedOut;
        }
        source = e.source();
    }
    false
}

// ── Idle guard ────────────────────────────────────────────────────────────────

/// IO wrapper that fails the transport once no bytes have moved in either
/// direction for `timeout`. Any read or write progress rearms the deadline.
///
/// hyper's own `header_read_timeout` only bounds the header section of each
/// request; this guard is what bounds body stalls and silent keep-alive
/// connections.
struct IdleTimeout<S> {
    inner: S,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<S> IdleTimeout<S> {
    fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout, deadline: Box::pin(tokio::time::sleep(timeout)) }
    }

    fn rearm(&mut self) {
        self.deadline
            .as_mut()
            .reset(tokio::time::Instant::now() + self.timeout);
    }

    /// Ready with the timeout error once the deadline passes; Pending keeps
    /// the waker registered for when it does.
    fn poll_idle(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        match self.deadline.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection idle past the configured timeout",
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.rearm();
                Poll::Ready(result)
            }
            Poll::Pending => this.poll_idle(cx).map(Err),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            Poll::Ready(result) => {
                this.rearm();
                Poll::Ready(result)
            }
            Poll::Pending => this.poll_idle(cx).map(Err),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
