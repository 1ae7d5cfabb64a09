use clap::Parser;
use color_eyre::eyre::Result;
use kube_overview::{CliOpts, LogFormat, do_main};

fn init_tracing(log_format: &LogFormat) {
    use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry()
        .with(filter_layer)
        .with(ErrorLayer::default());
    match log_format {
        LogFormat::text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::bunyan => registry
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new(
                env!("CARGO_PKG_NAME").to_owned(),
                std::io::stderr,
            ))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::config::HookBuilder::default()
        .panic_section("consider reporting the bug with the output of `RUST_LOG=debug kube-overview`")
        .install()?;
    let cli_opts = CliOpts::parse();
    init_tracing(&cli_opts.log_format);
    do_main(&cli_opts).await?;
    Ok(())
}
