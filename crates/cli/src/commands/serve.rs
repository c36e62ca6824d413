//! `larkrelay serve` — Start the webhook gateway.

use std::sync::Arc;
use std::time::Duration;

use larkrelay_agent::Driver;
use larkrelay_channels::LarkChannel;
use larkrelay_config::AppConfig;
use larkrelay_gateway::GatewayState;
use larkrelay_providers::OpenAiCompatProvider;
use larkrelay_store::SqliteStore;
use larkrelay_toolhost::McpHost;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let api_key = config
        .model
        .api_key
        .clone()
        .ok_or("No model API key configured — set OPENAI_API_KEY")?;
    let app_id = config
        .lark
        .app_id
        .clone()
        .ok_or("No Lark app id configured — set FEISHU_APP_ID")?;
    let app_secret = config
        .lark
        .app_secret
        .clone()
        .ok_or("No Lark app secret configured — set FEISHU_APP_SECRET")?;

    let store = SqliteStore::new(&config.store.db_path).await?;

    let provider = OpenAiCompatProvider::new(
        "openai",
        &config.model.api_base,
        api_key,
        Duration::from_secs(config.model.timeout_secs),
    )?;

    let channel = LarkChannel::new(&config.lark.api_base, app_id, app_secret)?;

    let toolhost = McpHost::new(
        &config.toolhost.command,
        config.toolhost.args.clone(),
        Duration::from_secs(config.toolhost.call_timeout_secs),
    );

    let driver = Driver::new(
        Arc::new(provider),
        Arc::new(channel),
        &config.model.chat_model,
    )
    .with_max_rounds(config.agent.max_rounds)
    .with_narration_cap(config.agent.narration_cap)
    .with_model_timeout(Duration::from_secs(config.model.timeout_secs))
    .with_max_attempts(config.model.max_attempts);

    let state = Arc::new(GatewayState {
        store: Arc::new(store),
        driver: Arc::new(driver),
        toolhost: Arc::new(toolhost),
    });

    println!("🦀 larkrelay gateway");
    println!(
        "   Listening: {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("   Model: {}", config.model.chat_model);
    println!(
        "   Tool host: {} {}",
        config.toolhost.command,
        config.toolhost.args.join(" ")
    );

    larkrelay_gateway::start(state, &config.gateway.host, config.gateway.port).await?;

    Ok(())
}
