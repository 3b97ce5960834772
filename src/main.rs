use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridwatch::services::dashboard::Dashboard;
use gridwatch::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");
    tracing::debug!("{:?}", config);

    let state = AppState::new(&config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("✅ AppState initialized");

    if !state.session.restore().await? {
        let (Some(username), Some(password)) = (&config.username, &config.password) else {
            anyhow::bail!("No stored session and no GRIDWATCH_USERNAME/GRIDWATCH_PASSWORD set");
        };
        if !state.session.login(username, password, config.remember).await {
            anyhow::bail!("Login failed for {}", username);
        }
    }
    state.session.spawn_storage_watch();

    let token = state
        .session
        .token()
        .context("Session ended before the dashboard could start")?;

    let dashboard = state.dashboard();
    dashboard.mount(&token).await;
    if let Some(error) = dashboard.error() {
        tracing::warn!("⚠️ Initial snapshot failed: {}", error);
        match dashboard.seed_from_latest(&token).await {
            Ok(count) => tracing::info!("📥 Seeded {} readings from the latest endpoint", count),
            Err(e) => tracing::warn!("❌ Latest readings unavailable: {}", e),
        }
    }

    tracing::info!("🚀 Watching the fleet, press Ctrl-C to stop");
    watch(&state, &dashboard).await;

    dashboard.unmount();
    tracing::info!("👋 Shutting down");
    Ok(())
}

/// Logs a summary whenever the view changes, at most once per interval,
/// until Ctrl-C or the end of the session.
async fn watch(state: &AppState, dashboard: &Dashboard) {
    let interval = state.config.summary_interval;
    let mut changes = dashboard.changes();
    let mut session = state.session.subscribe();
    let mut last_summary: Option<Instant> = None;
    let mut pending = true;

    loop {
        if pending && last_summary.is_none_or(|at| at.elapsed() >= interval) {
            summarize(state, dashboard);
            last_summary = Some(Instant::now());
            pending = false;
        }

        let wait = match (pending, last_summary) {
            (true, Some(at)) => interval.saturating_sub(at.elapsed()),
            _ => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                pending = true;
            }
            changed = session.changed() => {
                if changed.is_err() || session.borrow().is_none() {
                    tracing::warn!("🔒 Session ended");
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

fn summarize(state: &AppState, dashboard: &Dashboard) {
    let stats = dashboard.stats();
    let status = dashboard.feed_status();
    tracing::info!(
        "📊 {} regions, {} depots, {} transformers ({} active), {} sensors, {} live, {} alerting, stream {}",
        stats.total_regions,
        stats.total_depots,
        stats.total_transformers,
        stats.active_transformers,
        stats.total_sensors,
        stats.live_sensors,
        stats.alerting_sensors,
        if status.connected { "open" } else { "closed" }
    );

    if !state.permissions.has_permission("api.view_transformer") {
        tracing::debug!("Transformer detail hidden: missing api.view_transformer");
        return;
    }

    for (region, district, depot, transformer) in dashboard.view().transformers() {
        if transformer.alert_count > 0 {
            tracing::warn!(
                "🚨 {} / {} / {} / {}: {} of {} sensors alerting",
                region,
                district,
                depot,
                transformer.name,
                transformer.alert_count,
                transformer.sensor_count
            );
        }
    }
}
