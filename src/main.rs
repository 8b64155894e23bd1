use rtmp_relay::Config;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // Encoder output is mirrored under the `encoder` target at debug level;
    // opt in with RUST_LOG=info,encoder=debug.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration from CLI and/or config file
    let config = Config::load()?;
    rtmp_relay::run(config).await
}
