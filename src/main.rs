use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use parrot::ParrotEngine;
use parrot::api::start_api;
use parrot::config::Config;
use parrot::embedding;
use parrot::manager::{self, SystemProfile};
use parrot::server::ParrotServer;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing file means defaults
    #[clap(long, default_value = "parrot.toml")]
    config: PathBuf,

    #[clap(long)]
    addr: Option<String>,

    #[clap(long)]
    http_port: Option<u16>,

    #[clap(long)]
    threshold: Option<f32>,

    #[clap(long)]
    window_secs: Option<u64>,

    #[clap(long)]
    cache_file: Option<PathBuf>,

    /// Run without a snapshot file
    #[clap(long)]
    no_persist: bool,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(addr) = &self.addr {
            cfg.server.addr = addr.clone();
        }
        if let Some(port) = self.http_port {
            cfg.server.http_port = port;
        }
        if let Some(t) = self.threshold {
            cfg.dedup.similarity_threshold = t;
        }
        if let Some(w) = self.window_secs {
            cfg.dedup.time_window_secs = w;
        }
        if let Some(path) = &self.cache_file {
            cfg.dedup.cache_file = Some(path.clone());
        }
        if self.no_persist {
            cfg.dedup.cache_file = None;
        }
    }
}

fn main() {
    let args = Args::parse();

    let mut cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_level(true)
    .init();

    let profile = SystemProfile::detect();

    println!("--- [Parrot Resource Manager] ---");
    println!("Detected Cores: {}", profile.logical_cores);
    println!("Worker Threads: {}", profile.worker_threads);
    println!("Durability Mode: {}", if profile.strict_durability { "Strict (Fsync)" } else { "High Throughput (Async)" });
    println!("---------------------------------");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(cfg, profile)) {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn async_main(cfg: Config, profile: SystemProfile) -> Result<(), Box<dyn Error>> {
    let backend = embedding::from_config(&cfg.embedding)?;
    info!("Initializing embedder ({:?}, model {})...", cfg.embedding.provider, backend.name());
    let engine = Arc::new(ParrotEngine::open(cfg.dedup.clone(), backend, profile.strict_durability).await?);

    manager::start_snapshot_task(engine.clone(), Duration::from_secs(cfg.server.snapshot_interval_secs));

    if cfg.server.http_port != 0 {
        let api_engine = engine.clone();
        let port = cfg.server.http_port;
        tokio::spawn(async move {
            start_api(api_engine, port).await;
        });
    }

    let listener = TcpListener::bind(&cfg.server.addr).await?;
    info!("Parrot listening on {}", listener.local_addr()?);
    let server = ParrotServer::new(engine.clone());
    tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            error!("Server stopped: {}", e);
        }
    });

    println!("Parrot is Ready.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, writing final snapshot...");

    let engine_final = engine.clone();
    match tokio::task::spawn_blocking(move || engine_final.save_now()).await? {
        Ok(Some(bytes)) => info!("Final snapshot: {} bytes", bytes),
        Ok(None) => {}
        Err(e) => error!("Final snapshot failed: {}", e),
    }
    Ok(())
}
