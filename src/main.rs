use hotline::config::CallConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CallConfig::load()?;
    hotline::init_tracing(&config.log_filter);

    hotline::run(config).await
}
