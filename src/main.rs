mod cache;
mod cli;
mod commands;
mod config;
mod cookies;
mod db;
mod delivery;
mod downloader;
mod error;
mod error_log;
mod file_utils;
mod gate;
mod health;
mod logger;
mod metadata;
mod pipeline;
mod progress;
mod resolver;
mod service;
mod settings;
mod sources;
mod telegram;
mod transport;
mod worker;

#[cfg(test)]
mod testutil;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::Config;
use crate::db::Store;
use crate::downloader::{log_tool_availability, MediaExtractor, YtDlp};
use crate::service::BotService;
use crate::telegram::TelegramTransport;
use crate::worker::{DownloadHandler, DownloadQueue, DownloadWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_format, cli.verbose)?;

    let mut config = Config::load(&cli)?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    log_tool_availability(&config.ytdlp_bin);

    let store = Arc::new(Store::open(config.store_path())?);
    info!(path = %store.path().display(), users = store.user_count(), "state loaded");

    let bot = telegram::build_bot(&config.bot_token, config.upload_timeout)?;
    if config.bot_username.is_none() {
        config.bot_username = telegram::fetch_username(&bot).await;
    }
    let port = config.port;

    let shutdown = CancellationToken::new();
    let extractor: Arc<dyn MediaExtractor> = Arc::new(YtDlp::new(config.ytdlp_bin.clone()));
    let (queue, queue_rx) = DownloadQueue::new();
    let service = Arc::new(BotService::new(
        config,
        Arc::new(TelegramTransport::new(bot.clone())),
        extractor,
        store,
        queue,
        shutdown.clone(),
    ));
    if let Err(e) = service.cookies().restore().await {
        warn!(error = %e, "could not restore stored cookies");
    }

    let handler: Arc<dyn DownloadHandler> = service.clone();
    let worker = tokio::spawn(DownloadWorker::new(queue_rx, handler, shutdown.clone()).run());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health endpoint to {addr}"))?;
    let health = tokio::spawn(health::serve(listener, shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        signal.cancel();
    });

    let settings = service.settings().snapshot();
    info!(
        upload_mode = settings.upload_mode.as_str(),
        queue_enabled = settings.queue_enabled,
        auto_delete_delay = settings.auto_delete_delay,
        "bot started"
    );
    telegram::run_dispatcher(bot, Arc::clone(&service), shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = worker.await {
        error!(error = %e, "download worker ended abnormally");
    }
    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "health endpoint failed"),
        Err(e) => error!(error = %e, "health endpoint task ended abnormally"),
    }
    let deletions = service.delivery().deletions();
    if deletions.pending() > 0 {
        info!(pending = deletions.pending(), "dropping scheduled deletions");
    }
    deletions.close().await;
    info!("bye");
    Ok(())
}
