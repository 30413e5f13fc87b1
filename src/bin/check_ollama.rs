use anyhow::Result;
use medlit::AppConfig;
use ollama_rs::Ollama;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const CONNECTION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug)]
enum EndpointStatus {
    Up(Vec<String>), // Available models
    Down(String),    // Error message
}

async fn check_endpoint(config: &AppConfig) -> EndpointStatus {
    info!("Checking Ollama endpoint at {}", config.ollama_base_url());
    let ollama = Ollama::new(config.ollama_host_url(), config.ollama_port);

    match timeout(
        Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        ollama.list_local_models(),
    )
    .await
    {
        Ok(Ok(models)) => EndpointStatus::Up(models.iter().map(|m| m.name.clone()).collect()),
        Ok(Err(e)) => EndpointStatus::Down(format!("API error: {}", e)),
        Err(_) => EndpointStatus::Down("Connection timed out".to_string()),
    }
}

/// Ollama reports untagged models as `name:latest`.
fn has_model(available: &[String], wanted: &str) -> bool {
    available
        .iter()
        .any(|m| m == wanted || m.strip_suffix(":latest") == Some(wanted))
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!("OLLAMA ENDPOINT STATUS");
    println!("======================");

    let config = AppConfig::from_env()?;
    let required = [
        ("generation", config.llm_model.as_str()),
        ("embedding", config.embedding_model.as_str()),
    ];

    match check_endpoint(&config).await {
        EndpointStatus::Up(available) => {
            println!("✅ {} - UP", config.ollama_base_url());

            let mut missing = 0;
            for (role, model) in required {
                if has_model(&available, model) {
                    println!("  ✅ AVAILABLE ({}): {}", role, model);
                } else {
                    println!("  ❌ MISSING ({}): {}", role, model);
                    missing += 1;
                }
            }

            let additional: Vec<&String> = available
                .iter()
                .filter(|m| !required.iter().any(|(_, wanted)| has_model(std::slice::from_ref(*m), wanted)))
                .collect();
            if !additional.is_empty() {
                println!("  ℹ️ ADDITIONAL MODELS:");
                for model in additional {
                    println!("    - {}", model);
                }
            }

            if missing > 0 {
                println!("\n⚠️ Pull missing models with: ollama pull <model>");
                std::process::exit(1);
            }
        }
        EndpointStatus::Down(error) => {
            println!("❌ {} - DOWN", config.ollama_base_url());
            println!("  ⚠️ Error: {}", error);
            std::process::exit(1);
        }
    }

    Ok(())
}
