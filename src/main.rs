use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hourglass::cache::DEFAULT_MAX_ENTRIES;
use hourglass::server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "hourglass")]
#[command(about = "Caching DNS forwarder with live TTL rewriting", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value = "5300")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Upstream DNS server (host:port)
    #[arg(short, long, default_value = "119.29.29.29:53")]
    upstream: SocketAddr,

    /// Seconds between cache sweeps and saves
    #[arg(long, default_value = "1800")]
    maintenance_interval: u64,

    /// Cache snapshot file
    #[arg(long, default_value = "cache.gz")]
    cache_file: PathBuf,

    /// Upstream timeout in milliseconds
    #[arg(long, default_value = "3000")]
    upstream_timeout: u64,

    /// Maximum number of cached answers
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES)]
    max_entries: usize,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = ServerConfig {
        listen: SocketAddr::new(args.bind, args.port),
        upstream: args.upstream,
        upstream_timeout: Duration::from_millis(args.upstream_timeout),
        maintenance_interval: Duration::from_secs(args.maintenance_interval),
        cache_path: args.cache_file,
        max_entries: args.max_entries,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let server = Server::bind(config.clone())
            .await
            .with_context(|| format!("cannot bind {}", config.listen))?;
        server.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
