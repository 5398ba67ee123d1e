use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use screenpilot::config::load_config;
use screenpilot::errors::{PilotError, PilotResult};
use screenpilot::gateway::transport::HttpTransport;
use screenpilot::gateway::{Gateway, GatewayConfig};
use screenpilot::history::HistoryManager;
use screenpilot::orchestrator::Orchestrator;
use screenpilot::prompts::PromptManager;
use screenpilot::ScreenExecutor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> PilotResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let instructions: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if instructions.trim().is_empty() {
        return Err(PilotError::Config(
            "usage: screenpilot <task instructions>".into(),
        ));
    }

    let config = load_config()?;
    let api_key = config.api.resolve_api_key()?;

    let transport = HttpTransport::new(
        config.api.base_url.clone(),
        api_key,
        Duration::from_secs(config.api.request_timeout_secs),
    )?;

    let screen_count = xcap::Monitor::all().map(|m| m.len()).unwrap_or(1);
    let mut prompts = PromptManager::load();
    prompts.set_display_info(
        config.screen.model_width,
        config.screen.model_height,
        screen_count,
    );

    let gateway = Gateway::new(
        GatewayConfig {
            model: config.api.model.clone(),
            max_tokens: config.api.max_tokens,
            enable_caching: config.api.enable_caching,
            cache_ttl: Duration::from_secs(config.api.cache_ttl_secs),
            rate_limit_window: Duration::from_secs(config.api.rate_limit_window_secs),
            max_calls_per_window: config.api.max_calls_per_window,
            display_width: config.screen.model_width,
            display_height: config.screen.model_height,
            display_number: 1,
        },
        prompts,
        Box::new(transport),
    );

    let executor = ScreenExecutor::new(&config.screen, 0)?;
    let history = HistoryManager::new(config.history.data_dir.clone())?;

    let (status_tx, mut status_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = status_rx.recv().await {
            println!("{line}");
        }
    });

    let mut orchestrator = Orchestrator::new(
        gateway,
        executor,
        history,
        config.history.clone(),
        config.screen.optimization,
        status_tx,
    );

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, requesting stop");
            stop.store(false, Ordering::SeqCst);
        }
    });

    // The executor owns the OS input backend, so the loop runs on this task.
    orchestrator.run(&instructions).await
}
