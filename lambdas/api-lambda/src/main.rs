use annotations_block::auth_gate::watch_sign_out;
use lambda_http::{run, service_fn, Error, Request};
use notedmark_shared::{AppState, Config};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting NotedMark API - backend mode: {:?}", config.backend_mode);
    let state = Arc::new(AppState::from_config(config).await?);

    // Ended sessions are sent back to the sign-in page by /logout's response;
    // this records each one.
    tokio::spawn(watch_sign_out(state.gate.subscribe(), |route| {
        Box::pin(async move {
            tracing::info!("🔒 Session ended; client sent to {}", route);
        })
    }));

    run(service_fn(move |event: Request| {
        let state = state.clone();
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
