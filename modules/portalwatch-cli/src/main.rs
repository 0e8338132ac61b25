use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portalwatch_cli::EpochController;
use portalwatch_common::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("portalwatch=info".parse()?))
        .init();

    info!("portalwatch crawler starting...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "portalwatch.toml".to_string());
    let config = Config::from_file(&config_path)?;
    config.log_redacted();

    let controller = EpochController::new(config).await?;
    let report = controller.run().await?;

    println!("{report}");

    if report.sanity.passed() {
        Ok(())
    } else {
        for violation in &report.sanity.violations {
            eprintln!("sanity violation: {violation}");
        }
        std::process::exit(1);
    }
}
