use sitegate::{config::SiteConfig, init_server, observability::init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/sitegate.yaml".to_string());

    // Load configuration
    let mut config = match SiteConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: sitegate [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = config.apply_env_overrides() {
        eprintln!("Invalid environment override: {}", e);
        process::exit(1);
    }

    // Initialize tracing
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    // Start the server
    if let Err(e) = init_server(config).await {
        eprintln!("sitegate error: {}", e);
        process::exit(1);
    }
}
