use std::sync::Arc;

use zerosanity_backend::api::{self, AppState};
use zerosanity_backend::calculator::StatTable;
use zerosanity_backend::config::Config;
use zerosanity_backend::db::Database;
use zerosanity_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let stat_table = match StatTable::load(&config.operator_stats_path) {
        Ok(table) => {
            tracing::info!("Loaded stats for {} operators", table.len());
            table
        }
        Err(e) => {
            tracing::warn!("Operator stat table unavailable, calculator disabled: {e}");
            StatTable::default()
        }
    };

    let state = AppState::new(db, stat_table, &config);
    let app = api::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Zero Sanity backend listening on {addr}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
