use std::sync::Arc;

use anyhow::{bail, Result};
use futures::StreamExt;
use tokio::signal;

use project_manager_client::auth::{OidcIdentityProvider, SessionTokenProvider};
use project_manager_client::chat::{reply_listener, ChatClient};
use project_manager_client::config::Settings;
use project_manager_client::realtime::{InboundEvent, RealtimeConnectionManager, Topic};
use project_manager_client::rest::{Activity, ApiClient};
use project_manager_client::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;
    init_tracing(&settings.logging);
    tracing::info!("Configuration loaded");

    // Establish the session
    let identity = Arc::new(OidcIdentityProvider::new(settings.identity.clone())?);
    let tokens = SessionTokenProvider::new(identity);
    match (
        &settings.identity.username,
        &settings.identity.password,
        &settings.identity.refresh_token,
    ) {
        (Some(username), Some(password), _) => tokens.login(username, password).await?,
        (_, _, Some(refresh_token)) => tokens.restore(refresh_token).await?,
        _ => bail!("Set identity.username/identity.password or identity.refresh_token"),
    }

    let api = ApiClient::new(&settings.api, tokens.clone())?;
    match api.get_projects().await {
        Ok(projects) => tracing::info!(count = projects.len(), "Projects loaded"),
        Err(e) => tracing::warn!(error = %e, "Could not load projects"),
    }
    match api.get_notifications().await {
        Ok(history) => tracing::info!(count = history.len(), "Notification history loaded"),
        Err(e) => tracing::warn!(error = %e, "Could not load notification history"),
    }

    // Start the realtime connection
    let realtime = settings.realtime.clone();
    let manager = Arc::new(
        RealtimeConnectionManager::builder(realtime.clone(), tokens.clone())
            .subscribe(Topic::broadcast(realtime.broadcast_topic.clone()), log_activity)
            .subscribe(Topic::private_queue(realtime.notification_queue.clone()), log_activity)
            .subscribe(
                ChatClient::reply_topic(&realtime),
                reply_listener(|message| {
                    tracing::info!(role = ?message.role, content = %message.content, "Chat reply");
                }),
            )
            .build(),
    );

    let mut statuses = manager.status_stream();
    let status_handle = tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            tracing::info!(
                state = %status.state,
                phase = %status.phase,
                retry_count = status.retry_count,
                "Connection status"
            );
        }
    });

    manager.connect();
    shutdown_signal_handler().await;

    tracing::info!("Disconnecting...");
    manager.shutdown().await;
    status_handle.abort();
    tokens.logout().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_activity(event: &InboundEvent) {
    match event.decode::<Activity>() {
        Ok(activity) => tracing::info!(
            destination = %event.destination,
            details = activity.details.as_deref().unwrap_or_default(),
            "Notification"
        ),
        Err(e) => tracing::warn!(error = %e, "Unexpected notification payload"),
    }
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
