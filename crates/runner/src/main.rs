//! Runner entry point.

use bookings::DemoServices;
use runner::{Config, LogFormat};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    // 2. Initialize tracing
    init_tracing(&config);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Build the host and run the workflow
    let host = runner::build_host(&config, DemoServices::in_memory());
    let result = tokio::select! {
        result = runner::run(&config, &host) => result,
        _ = signal::ctrl_c() => {
            tracing::info!("received SIGINT, abandoning orchestration");
            std::process::exit(130);
        }
    };

    // 5. Report
    let code = match result {
        Ok(status) => {
            match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(error = %e, "failed to render status"),
            }
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            1
        }
    };

    if config.print_metrics {
        println!("{}", metrics_handle.render());
    }
    std::process::exit(code);
}
