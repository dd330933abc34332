//! Binary entry point. Parses CLI flags, layers config (spec §7 "Config"),
//! bootstraps the CA and admin server, and serves the command surface until
//! a shutdown signal. Exit codes follow spec §6 verbatim: 0 clean shutdown,
//! 1 bind failure, 2 fatal CA init failure, 3 unrecoverable runtime error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use syrah::admin::Admin;
use syrah::state::AppState;
use syrah::AppConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Syrah interactive HTTP/HTTPS debugging proxy", long_about = None)]
struct Args {
	/// YAML config file; overridden by `SYRAH_*` env vars.
	#[arg(short, long, value_name = "file")]
	config: Option<PathBuf>,

	/// Start the proxy listener immediately instead of waiting for a
	/// `start_proxy` admin command.
	#[arg(long)]
	autostart: bool,
}

fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let args = Args::parse();

	let config = match AppConfig::load(args.config.as_deref()) {
		Ok(config) => config,
		Err(err) => {
			error!(%err, "config error");
			return ExitCode::from(1);
		},
	};

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("tokio runtime")
		.block_on(run(config, args.autostart))
}

async fn run(config: AppConfig, autostart: bool) -> ExitCode {
	let admin_addr = std::net::SocketAddr::new(config.admin_bind_address, config.admin_port);

	let state = match AppState::bootstrap(config) {
		Ok(state) => std::sync::Arc::new(state),
		Err(err) => {
			error!(%err, "certificate authority bootstrap failed");
			return ExitCode::from(2);
		},
	};

	if autostart {
		if let Err(err) = state.start_proxy(Default::default()).await {
			error!(%err, "autostart failed");
			return ExitCode::from(3);
		}
	}

	let admin = Admin::new(state.clone());
	let listener = match tokio::net::TcpListener::bind(admin_addr).await {
		Ok(listener) => listener,
		Err(err) => {
			error!(%err, address = %admin_addr, "admin server failed to bind");
			return ExitCode::from(1);
		},
	};
	let local_addr = listener.local_addr().unwrap_or(admin_addr);
	info!(address = %local_addr, "admin server listening");

	let serve_result = axum::serve(listener, admin.router())
		.with_graceful_shutdown(shutdown_signal())
		.await;

	if state.is_running().await {
		let _ = state.stop_proxy().await;
	}

	match serve_result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!(%err, "admin server error");
			ExitCode::from(3)
		},
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
	};
	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("install SIGTERM handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!("shutdown signal received, draining");
}
