use clap::{Parser, Subcommand};
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use cms_edge::config::Config;
use cms_edge::error::EdgeError;
use cms_edge::metrics::Metrics;
use cms_edge::proxy::EdgeProxy;
use cms_edge::redirects::{RebuildOutcome, RedirectService};
use cms_edge::refresh::RefreshScheduler;
use cms_edge::routing::EdgeRouter;

/// CMS edge router - redirects, locale routing and query smuggling in front
/// of a server-rendered site
#[derive(Parser, Debug)]
#[command(name = "cms-edge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the edge proxy (default)
    Serve {
        /// Upgrade workers gracefully
        #[arg(long)]
        upgrade: bool,
    },
    /// Fetch the redirect table and rebuild the bloom filter, then exit
    RebuildRedirects {
        /// Ignore the persisted up-to-date flag
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = cms_edge::logging::init_subscriber(config.logging.format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        config_file = %args.config.display(),
        locales = ?config.locales,
        origin = %config.origin.host,
        "Configuration loaded successfully"
    );

    if args.test {
        println!("configuration file {} is ok", args.config.display());
        return ExitCode::SUCCESS;
    }

    let result = match args.command {
        Some(Command::RebuildRedirects { force }) => rebuild_redirects(&config, force),
        Some(Command::Serve { upgrade }) => serve(config, upgrade),
        None => serve(config, false),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "cms-edge exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<Config, EdgeError> {
    let config = Config::from_file(path)
        .map_err(|e| EdgeError::Config(format!("Failed to load configuration: {}", e)))?;
    config
        .validate()
        .map_err(|e| EdgeError::Config(format!("Invalid configuration: {}", e)))?;
    Ok(config)
}

/// Offline rebuild, the build-time counterpart of the webhook endpoint.
fn rebuild_redirects(config: &Config, force: bool) -> Result<ExitCode, EdgeError> {
    let runtime = tokio::runtime::Runtime::new()?;
    let service = RedirectService::from_config(&config.redirects, Arc::new(Metrics::new()));

    let report = runtime.block_on(async {
        if let Err(e) = service.init().await {
            tracing::warn!(error = %e, "Starting rebuild without persisted redirect artifacts");
        }
        service.rebuild(force).await
    });

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::warn!(error = %e, "Failed to render rebuild report"),
    }

    if report.outcome == RebuildOutcome::Failed {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn serve(config: Config, upgrade: bool) -> Result<ExitCode, EdgeError> {
    let metrics = Arc::new(Metrics::new());
    let service = Arc::new(RedirectService::from_config(
        &config.redirects,
        Arc::clone(&metrics),
    ));

    // Load persisted artifacts before accepting traffic. No CMS call here.
    let runtime = tokio::runtime::Runtime::new()?;
    if let Err(e) = runtime.block_on(service.init()) {
        tracing::warn!(
            error = %e,
            "Persisted redirects unavailable, serving without redirects until the next refresh"
        );
    }
    drop(runtime);

    let router = EdgeRouter::from_config(&config, service.resolver(), Arc::clone(&metrics))
        .map_err(|e| EdgeError::Config(e.to_string()))?;

    let scheduler = RefreshScheduler::new(Arc::clone(&service), config.redirects.refresh_interval_secs);
    #[cfg(unix)]
    if let Err(e) = scheduler.register_signal_handler() {
        tracing::warn!(error = %e, "SIGHUP redirect refresh disabled");
    }
    let _refresh = scheduler.start().map_err(EdgeError::Config)?;

    // No daemon mode: the refresh thread would not survive the fork.
    let opt = Opt {
        upgrade,
        ..Default::default()
    };

    let mut server = Server::new(Some(opt))
        .map_err(|e| EdgeError::Config(format!("Failed to create Pingora server: {}", e)))?;
    server.bootstrap();

    let listen_addr = config.server.listen_addr();
    let proxy = EdgeProxy::new(&config, router, service, metrics);

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
    proxy_service.threads = Some(config.server.threads);
    proxy_service.add_tcp(&listen_addr);

    tracing::info!(
        address = %listen_addr,
        threads = config.server.threads,
        "Starting cms-edge"
    );

    server.add_service(proxy_service);

    // Blocks until shutdown
    server.run_forever();
}
