use std::sync::Arc;

use billing::config::Settings;
use billing::server::{AppState, create_app};
use billing::storage::time::{BillingTimer, billing_offset};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let config = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(BillingTimer::new(billing_offset(
            config.billing.utc_offset_hours,
        )))
        .init();

    let sweep_once = std::env::args().nth(1).as_deref() == Some("sweep");
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let sweep_interval = config.billing.sweep_interval_secs;
    let app_state = Arc::new(AppState::build(config).await?);

    if sweep_once {
        let report = app_state.reconciler.run_sweep(Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some(secs) = sweep_interval {
        tracing::info!("Renewal sweep scheduled every {}s", secs);
        billing::scheduler::spawn(app_state.reconciler.clone(), secs);
    }

    let app = create_app(app_state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Billing server running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
