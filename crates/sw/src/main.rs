use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sw_core::{
    bounded::BoundedChat,
    config::Config,
    ports::ChatPort,
    service::{PresenceService, ServiceSettings},
    store::{PresenceStore, SqliteStore},
};
use sw_discord::DiscordChat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sw_core::logging::init("sw")?;

    let cfg = Config::load()?;

    let store: Arc<dyn PresenceStore> = Arc::new(
        SqliteStore::new(&cfg.database_path)
            .with_context(|| format!("failed to open {}", cfg.database_path.display()))?,
    );
    let chat: Arc<dyn ChatPort> = Arc::new(BoundedChat::new(
        Arc::new(DiscordChat::new(&cfg.discord_token)),
        cfg.outbound_timeout,
    ));
    let platforms = sw_platforms::build_registry(&cfg)?.bounded(cfg.outbound_timeout);

    let service = Arc::new(PresenceService::new(
        store,
        chat,
        platforms,
        ServiceSettings::from_config(&cfg),
    ));

    if cfg.push_enabled() {
        if let Err(e) = service.resubscribe_all().await {
            tracing::warn!("startup resubscription failed: {e}");
        }
    } else {
        tracing::info!("push delivery not configured; skipping resubscription");
    }

    service.start_polling();

    let shutdown = CancellationToken::new();
    let router = sw_eventsub::build_router(service.clone(), &cfg.webhook_path);
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        let bind = cfg.webhook_bind.clone();
        async move {
            let res = sw_eventsub::serve(&bind, router, shutdown.clone()).await;
            // A server that exits on its own takes the process down with it.
            shutdown.cancel();
            res
        }
    });

    tokio::select! {
      res = tokio::signal::ctrl_c() => {
        res.context("failed to listen for ctrl-c")?;
        tracing::info!("shutdown requested");
      }
      _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let server_result = server.await;
    match server_result {
        Ok(Err(e)) => tracing::error!("webhook server failed: {e:#}"),
        Err(e) => tracing::error!("webhook server task panicked: {e}"),
        Ok(Ok(())) => {}
    }
    service.shutdown().await;
    Ok(())
}
