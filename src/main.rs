use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| String::from("fpx.toml"));
    let config: fpx::Config = toml::from_str(&tokio::fs::read_to_string(&path).await?)?;

    fpx::Master::init(config.normalize())?
        .shutdown_on(tokio::signal::ctrl_c())
        .run()
        .await?;

    Ok(())
}
