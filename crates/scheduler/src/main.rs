use std::sync::Arc;

use subsentry_common::config::AppConfig;
use subsentry_common::db;
use subsentry_common::redis_pool::create_redis_pool;
use subsentry_engine::{RenewalScheduler, SchedulerSettings};
use subsentry_notifier::build_notifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subsentry_scheduler=info,subsentry_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Subsentry renewal scheduler starting...");

    // Any invalid setting stops startup here
    let config = AppConfig::from_env()?;
    let settings = SchedulerSettings::from_config(&config)?;
    let notifier = build_notifier(&config)?;
    tracing::info!(channel = notifier.channel_name(), "Notifier configured");

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    // Delivery claims live in Redis so replicas never send the same alert twice
    let redis = create_redis_pool(&config.redis_url).await?;

    let scheduler = Arc::new(RenewalScheduler::with_backends(
        pool, redis, notifier, settings,
    ));

    let mut runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    // Run until Ctrl+C, then let in-flight deliveries finish
    let joined = tokio::select! {
        joined = &mut runner => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            scheduler.shutdown();
            runner.await
        }
    };

    if let Err(e) = joined? {
        tracing::error!(error = %e, "Renewal scheduler exited with error");
        return Err(e);
    }

    tracing::info!("Subsentry renewal scheduler stopped.");
    Ok(())
}
