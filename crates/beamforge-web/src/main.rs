//! Binary entry point: `serve` runs the HTTP/WS server (the default),
//! `run` submits a single job and blocks until it finishes — a smoke-test
//! path for CI that never binds a socket (§2).

use std::time::Duration;

use beamforge_core::domain::Params;
use beamforge_web::config::Config;
use beamforge_web::state::AppState;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "beamforge-server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WS server (default when no subcommand is given).
    Serve,
    /// Submit one job with the given prompt and block until it completes,
    /// printing the final job record as JSON. Intended for CI smoke tests.
    Run {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 2)]
        n: u32,
        #[arg(long, default_value_t = 1)]
        m: u32,
        #[arg(long, default_value_t = 1)]
        iterations: u32,
        #[arg(long, default_value_t = 0.5)]
        alpha: f64,
        #[arg(long, default_value_t = 1.0)]
        temperature: f64,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beamforge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();

    let exit_code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run {
            prompt,
            n,
            m,
            iterations,
            alpha,
            temperature,
        } => {
            run_once(
                config,
                Params {
                    prompt,
                    n,
                    m,
                    iterations,
                    alpha,
                    temperature,
                    steps: None,
                    guidance: None,
                    seed: None,
                },
            )
            .await
        }
    };

    std::process::exit(exit_code);
}

async fn serve(config: Config) -> i32 {
    let port = config.port;
    let state = AppState::new(config);
    let app = beamforge_web::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, %addr, "failed to bind listener");
            return 1;
        }
    };
    tracing::info!(%addr, "beamforge-server listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(%err, "server exited with error");
            1
        }
    }
}

async fn run_once(config: Config, params: Params) -> i32 {
    let state = AppState::new(config);
    let job = match state.jobs.submit(params).await {
        Ok(job) => job,
        Err(err) => {
            tracing::error!(%err, "job submission failed");
            return 1;
        }
    };

    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let Some(snapshot) = state.jobs.snapshot(job.job_id).await else {
            tracing::error!("job disappeared from the manager");
            return 1;
        };
        if snapshot.status.is_terminal() {
            match serde_json::to_string_pretty(&snapshot) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::error!(%err, "failed to serialize job record"),
            }
            return if snapshot.status == beamforge_core::domain::JobStatus::Completed {
                0
            } else {
                1
            };
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
