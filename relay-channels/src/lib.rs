//! Relay Channels - gateway adapters and command dispatch.
//!
//! ## Architecture
//!
//! The relay receives commands and replies from a messaging gateway, keeps
//! conversation state in the history store, asks the provider for a
//! response, and sends it back in gateway-sized chunks.
//!
//! ```text
//! User → Gateway → CommandDispatcher → Provider
//!                        ↓    ↑
//!               ConversationStore
//! User ← Gateway ← split_message ← Response
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bridge;
pub mod cli;
pub mod format;
pub mod message;
pub mod routes;
pub mod traits;

// Re-export commonly used types
pub use bridge::{CommandDispatcher, DispatcherSettings, HELP_TEXT};
pub use cli::CliGateway;
pub use format::{split_message, MAX_MESSAGE_LENGTH};
pub use message::{
    ChannelMessage, ChannelType, CommandEvent, InboundEvent, OutgoingContent, OutgoingMessage,
};
pub use routes::build_router;
pub use traits::{ChannelError, ChannelResult, Gateway};

use relay_agent::GeminiProvider;
use relay_common::config::Config;
use relay_history::{ConversationStore, JsonFileStore, StoreOptions};
use std::net::SocketAddr;
use std::sync::Arc;

/// User ID the CLI gateway acts as.
const CLI_USER: &str = "cli-user";

/// Run the relay: CLI gateway, dispatcher and health server.
///
/// Returns after stdin closes or a shutdown signal arrives, once named
/// histories have been flushed.
pub async fn start(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let persistence = Arc::new(JsonFileStore::new(config.history.dir()));
    let store = Arc::new(
        ConversationStore::open(
            persistence,
            StoreOptions {
                anchor_capacity: config.history.anchor_capacity,
                system_role_supported: config.provider.system_role_supported,
            },
        )
        .await?,
    );

    let provider = GeminiProvider::new(config.provider.api_key.as_deref(), &config.provider.model)
        .with_image_model(&config.provider.image_model)
        .with_temperature(config.provider.temperature);
    if !provider.has_api_key() {
        tracing::warn!("No Gemini API key configured, generation requests will fail");
    }

    let gateway = Arc::new(
        CliGateway::new(CLI_USER).with_max_message_length(config.gateway.max_message_length),
    );
    let dispatcher = Arc::new(CommandDispatcher::new(
        store.clone(),
        Arc::new(provider),
        gateway.clone(),
        DispatcherSettings::from_config(config),
    ));

    let (tx, rx) = tokio::sync::mpsc::channel(100);
    let processor_handle = CommandDispatcher::spawn_processor(dispatcher, rx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health endpoint listening on {}", addr);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router()).await {
            tracing::error!(error = %e, "Health server stopped");
        }
    });

    tokio::select! {
        result = gateway.listen(tx) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "CLI gateway failed");
            }
            // Let in-flight events finish before flushing.
            let _ = processor_handle.await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            processor_handle.abort();
        }
    }

    server_handle.abort();
    store.flush().await?;
    tracing::info!("Relay stopped");
    Ok(())
}
