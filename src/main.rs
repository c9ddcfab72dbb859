use clap::Parser;
use dotenvy::dotenv;
use forum_chat::chat::ChatSession;
use forum_chat::config;
use forum_chat::ui::ConsoleApp;

#[derive(Parser)]
#[command(
    name = "forum-chat",
    version,
    about = "Terminal client for forum direct messages"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Forum origin, e.g. https://forum.example
    #[arg(long, value_name = "URL")]
    origin: Option<String>,
    /// Open the conversation with this user on start
    #[arg(long, value_name = "ID")]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env_overrides();
    if let Some(origin) = cli.origin {
        app_config.server_origin = origin;
    }

    let session = ChatSession::start(&app_config).await?;
    log::info!("Chat session started against {}", app_config.server_origin);

    if let Some(peer) = cli.peer.as_deref() {
        if let Err(err) = session.controller().select_peer_str(peer).await {
            log::warn!("Could not open conversation `{peer}`: {err}");
        }
    }

    let app = ConsoleApp::new(session.controller().clone(), session.subscribe());
    let result = app.run().await;
    session.shutdown().await;
    result?;
    Ok(())
}
