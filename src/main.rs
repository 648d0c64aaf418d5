use axum::{
    routing::{get, post},
    Router,
};
use examgen_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::throttle::{generation_gate_middleware, GenerationGate},
    routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);
    let gate = GenerationGate::new(config.max_concurrent_generations);

    let generation_api = Router::new()
        .route("/api/exams/generate", post(routes::generation::generate_exam))
        .route("/api/exams/translate", post(routes::generation::translate_exam))
        .layer(axum::middleware::from_fn_with_state(
            gate,
            generation_gate_middleware,
        ));

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/api/exams/recent/:user_id",
            get(routes::generation::recent_exams),
        )
        .merge(generation_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
