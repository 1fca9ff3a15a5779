#[tokio::main]
async fn main() {
    use kanna_ai::OpenRouterBackend;
    use kanna_bot::{Dispatcher, config::BotConfig, driver};
    use kanna_conversation::{ConversationStore, JsonFileRepository, SessionRegistry};
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    // Replies go to stdout, so logs must not.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = BotConfig::from_env().expect("failed to load configuration");
    tracing::info!(
        memory = %config.memory.path.display(),
        model = %config.generation.model,
        "Loaded configuration"
    );

    let backend =
        OpenRouterBackend::new(config.generation).expect("failed to create generation backend");

    let store = ConversationStore::new(
        JsonFileRepository::new(config.memory.path),
        config.memory.channel_limit,
    );
    if let Err(e) = store.load().await {
        tracing::warn!(error = %e, "conversation memory unavailable; will retry on first use");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(SessionRegistry::new()),
        store,
        backend,
        config.assistant,
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    driver::run(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await
    .expect("event loop error");

    tracing::info!("Shut down");
}
