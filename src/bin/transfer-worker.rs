//! Extraction worker executable
//!
//! Speaks the worker protocol over stdin/stdout; logs go to stderr.
//! Log verbosity follows `RUST_LOG` (default `info`).

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    transfer_dl::worker::stdio::serve(transfer_dl::extraction::run_extraction_worker).await
}
