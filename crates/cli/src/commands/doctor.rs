//! `larkrelay doctor` — Diagnose configuration and connectivity.

use std::time::Duration;

use larkrelay_config::AppConfig;
use larkrelay_core::provider::Provider;
use larkrelay_core::toolhost::ToolHost;
use larkrelay_providers::OpenAiCompatProvider;
use larkrelay_store::SqliteStore;
use larkrelay_toolhost::McpHost;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 larkrelay doctor");
    println!("===================\n");

    let mut issues = 0;

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            return Ok(());
        }
    };

    match &config.model.api_key {
        Some(key) => {
            println!("  ✅ Model API key configured");
            let provider = OpenAiCompatProvider::new(
                "openai",
                &config.model.api_base,
                key.clone(),
                Duration::from_secs(10),
            )?;
            match provider.health_check().await {
                Ok(true) => println!("  ✅ Model API reachable"),
                Ok(false) => {
                    println!("  ⚠️  Model API answered with an error status");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Model API unreachable: {e}");
                    issues += 1;
                }
            }
        }
        None => {
            println!("  ⚠️  No model API key — set OPENAI_API_KEY");
            issues += 1;
        }
    }

    if config.has_lark_credentials() {
        println!("  ✅ Lark app credentials configured");
    } else {
        println!("  ⚠️  No Lark credentials — set FEISHU_APP_ID and FEISHU_APP_SECRET");
        issues += 1;
    }

    match SqliteStore::new(&config.store.db_path).await {
        Ok(_) => println!("  ✅ Database reachable ({})", config.store.db_path),
        Err(e) => {
            println!("  ❌ Database unreachable: {e}");
            issues += 1;
        }
    }

    let host = McpHost::new(
        &config.toolhost.command,
        config.toolhost.args.clone(),
        Duration::from_secs(config.toolhost.call_timeout_secs),
    );
    match host.open().await {
        Ok(session) => {
            println!(
                "  ✅ Tool host started ({} tools advertised)",
                session.schemas().len()
            );
            session.close().await;
        }
        Err(e) => {
            println!("  ❌ Tool host failed to start: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
