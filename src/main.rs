use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use gatehouse::auth::{Principal, SigV2Authorizer, TokenAuthorizer};
use gatehouse::backend::MemoryBackend;
use gatehouse::config::GatewayConfig;
use gatehouse::dialect::{S3DialectManager, SwiftDialectManager};
use gatehouse::pipeline::PipelineContext;
use gatehouse::pool::{BoundedWorkerPool, PoolConfig};
use gatehouse::router::RouterBuilder;
use gatehouse::{logging, server, signals};

/// Request-processing core for a dual-dialect (S3-like/Swift-like) HTTP
/// object-storage gateway.
#[derive(Parser, Debug)]
#[command(name = "gatehoused", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long = "conf", default_value = "gatehouse.toml")]
    conf: PathBuf,

    /// Instance id, reported in startup logs only.
    #[arg(long = "id", default_value = "gateway-0")]
    id: String,

    /// Override `debug_rgw` verbosity from the config file.
    #[arg(long = "debug-rgw")]
    debug_rgw: Option<u8>,

    /// Fork into the background and detach from the controlling terminal.
    #[arg(long = "daemonize")]
    daemonize: bool,
}

/// Classic double-fork daemonization: first fork + exit detaches from the
/// parent, `setsid` leaves the controlling terminal's session, second fork
/// + exit ensures the daemon can never reacquire one. Must run before the
/// async runtime starts — forking a multi-threaded process is unsafe.
fn daemonize() {
    unsafe {
        match libc::fork() {
            -1 => panic!("daemonize: first fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            panic!("daemonize: setsid failed");
        }
        match libc::fork() {
            -1 => panic!("daemonize: second fork failed"),
            0 => {}
            _ => std::process::exit(0),
        }
        libc::close(0);
        libc::close(1);
        libc::close(2);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.daemonize {
        daemonize();
    }
    tokio::runtime::Runtime::new()?.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = GatewayConfig::load(&cli.conf)?;
    if let Some(level) = cli.debug_rgw {
        config.debug_rgw = level;
    }
    logging::init_tracing(config.tracing_level());
    tracing::info!(id = %cli.id, conf = %cli.conf.display(), "starting gatehoused");

    let bind_addr = config.bind_addr;
    let pool_config = PoolConfig {
        thread_count: config.thread_pool_size,
        op_thread_timeout: config.op_thread_timeout,
        op_thread_suicide_timeout: config.op_thread_suicide_timeout,
    };
    let config = Arc::new(ArcSwap::from_pointee(config));

    let backend = MemoryBackend::new();
    let authorizer = SigV2Authorizer::new(vec![Principal {
        access_key: "demo".into(),
        secret_key: "demo-secret".into(),
        user: gatehouse::auth::UserRecord {
            id: "demo".into(),
            display_name: "Demo User".into(),
            tenant: "demo".into(),
            suspended: false,
        },
    }]);
    let swift_authorizer = TokenAuthorizer::new(vec![]);

    let router = RouterBuilder::new()
        .default_manager(S3DialectManager::new(backend.clone(), authorizer))
        .register("/swift/v1", SwiftDialectManager::new(backend, swift_authorizer))
        .build();

    let pool = Arc::new(BoundedWorkerPool::new(pool_config));
    let ctx = Arc::new(PipelineContext::new(router, config.clone()));
    let shutdown = signals::spawn(cli.conf.clone(), config);

    let listener = TcpListener::bind(bind_addr).await?;
    server::serve(listener, ctx, pool, shutdown).await?;
    Ok(())
}
