use std::sync::Arc;

use refiloe::channels::{
    DisabledStorage, FileStorage, MessagingClient, SupabaseStorage, WhatsAppClient,
};
use refiloe::config::AppConfig;
use refiloe::router::Router;
use refiloe::server::{app, AppState};
use refiloe::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("💪 Refiloe v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!(
        "   Analytics: http://0.0.0.0:{}/api/registration/analytics/summary",
        config.port
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open database at {}: {e}", config.db_path);
            std::process::exit(1);
        },
    ));
    eprintln!("   Database: {}", config.db_path);

    // ── Messaging ────────────────────────────────────────────────────────
    let messaging: Arc<dyn MessagingClient> = Arc::new(WhatsAppClient::new(
        config.whatsapp_token.clone(),
        config.phone_number_id.clone(),
        config.registration_flow_id.clone(),
    ));
    eprintln!(
        "   Registration form: {}",
        if config.registration_flow_id.is_some() {
            "WhatsApp Flow"
        } else {
            "text questions"
        }
    );

    // ── Storage ──────────────────────────────────────────────────────────
    let storage: Arc<dyn FileStorage> = match (&config.storage_url, &config.storage_key) {
        (Some(url), Some(key)) => {
            eprintln!("   Exports: {} (bucket {})", url, config.storage_bucket);
            Arc::new(SupabaseStorage::new(
                url.clone(),
                key.clone(),
                config.storage_bucket.clone(),
            ))
        }
        _ => {
            eprintln!("   Exports: disabled (set STORAGE_URL and STORAGE_KEY)");
            Arc::new(DisabledStorage)
        }
    };

    // ── HTTP server ──────────────────────────────────────────────────────
    let router = Arc::new(Router::new(Arc::clone(&db), messaging, storage));
    let state = AppState {
        router,
        db,
        verify_token: config.webhook_verify_token.clone(),
    };

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Webhook server started");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
