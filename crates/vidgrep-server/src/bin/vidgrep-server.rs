use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vidgrep_server::router;
use vidgrep_server::service::{
    DEFAULT_DISPLAY_OFFSET_SECONDS, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT, QueryConfig,
    QueryService,
};

#[derive(Debug, Parser)]
#[command(
    name = "vidgrep-server",
    about = "Serve extracted video text and extraction progress over HTTP",
    disable_help_subcommand = true
)]
struct CliArgs {
    /// Path to the extraction database
    #[arg(long = "database", value_name = "FILE", default_value = "vidgrep.db")]
    database: PathBuf,

    /// Address to listen on
    #[arg(long = "listen", default_value = "127.0.0.1:5000")]
    listen: SocketAddr,

    /// Records per page in the full listing
    #[arg(
        long = "page-size",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    page_size: u64,

    /// Maximum records returned by one search
    #[arg(
        long = "search-limit",
        default_value_t = DEFAULT_SEARCH_LIMIT,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    search_limit: u64,

    /// Seconds added to stored timestamps when rendering display times
    #[arg(
        long = "display-offset",
        value_name = "SECONDS",
        default_value_t = DEFAULT_DISPLAY_OFFSET_SECONDS
    )]
    display_offset: u64,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse();
    let config = QueryConfig {
        search_limit: args.search_limit,
        page_size: args.page_size,
        display_offset_seconds: args.display_offset,
    };
    let service = Arc::new(QueryService::open(&args.database, config).await?);
    let app = router(service);

    let listener = TcpListener::bind(args.listen).await?;
    info!(
        address = %args.listen,
        database = %args.database.display(),
        "query service listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
