//! Bot runtime: start the WhatsApp channel, route inbound messages to commands, shut down on signal.

use crate::channels::{
    ChannelHandle, ChannelRegistry, ChannelReply, InboundMessage, WhatsAppChannel,
};
use crate::commands;
use crate::config::{self, Config};
use crate::download::Downloader;
use crate::init;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Shared state for message handling.
#[derive(Clone)]
pub struct BotState {
    pub downloader: Arc<Downloader>,
    pub channel_registry: Arc<ChannelRegistry>,
}

impl BotState {
    pub fn new(config: &Config) -> Self {
        Self {
            downloader: Arc::new(Downloader::new(&config.downloads)),
            channel_registry: Arc::new(ChannelRegistry::new()),
        }
    }
}

/// Handle one inbound message: resolve the reply sink for its chat, then parse and dispatch the text.
pub async fn process_inbound_message(state: BotState, msg: InboundMessage) {
    let Some(handle) = state.channel_registry.get(&msg.channel_id).await else {
        log::warn!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    let sink = Arc::new(ChannelReply::new(
        handle,
        msg.conversation_id.clone(),
        msg.message_id.clone(),
    ));
    // Downloads report through the sink on their own; nothing to await here.
    let _ = commands::handle_text(&msg.text, sink, &state.downloader).await;
}

/// Run the bot until the bridge exits or the process receives Ctrl+C / SIGTERM.
/// `config_path` is the path to the config file (used to resolve the bridge auth directory).
pub async fn run_bot(config: Config, config_path: PathBuf) -> Result<()> {
    init::check_downloads_dir(&config.downloads);

    let state = BotState::new(&config);
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>> = Arc::new(RwLock::new(Vec::new()));

    let whatsapp = Arc::new(WhatsAppChannel::new(
        config::resolve_bridge_command(&config),
        config.channels.whatsapp.bridge_args.clone(),
        config::resolve_auth_dir(&config, &config_path),
    ));
    state
        .channel_registry
        .register(whatsapp.id().to_string(), whatsapp.clone())
        .await;
    let handle = whatsapp.start_inbound(inbound_tx).await?;
    channel_tasks.write().await.push(handle);
    log::info!(
        "whatsapp channel registered; downloads go to {}",
        state.downloader.directory().display()
    );

    let processor = {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                tokio::spawn(process_inbound_message(state.clone(), msg));
            }
        })
    };

    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("shutdown signal received, stopping channels");
        }
        _ = processor => {
            log::info!("inbound channel closed");
        }
    }

    for id in state.channel_registry.ids().await {
        if let Some(handle) = state.channel_registry.get(&id).await {
            handle.stop();
        }
    }
    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("bot stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
