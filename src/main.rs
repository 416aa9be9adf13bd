//! The reference deployment: users endpoints, access log, permissive CORS,
//! defaults from [`ServerConfig`]. No flags; tune logging with `RUST_LOG`.

use std::process::ExitCode;

use anyhow::Context;
use keel::middleware::cors::{Cors, CorsPolicy};
use keel::middleware::trace::Trace;
use keel::{Router, Server, ServerConfig, Shutdown, user};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<Shutdown> {
    let cors = Cors::new(CorsPolicy::default()).context("invalid CORS policy")?;

    let app = user::register(Router::new())
        .layer(Trace::new())
        .layer(cors);

    let server = Server::bind(ServerConfig::default())
        .await
        .context("could not start server")?;

    Ok(server.serve(app).await?)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .init();
}
