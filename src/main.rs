//! LED Pattern Controller
//!
//! Drives LEDs wired to Raspberry Pi GPIO pins with timed patterns, either
//! from an interactive menu on the terminal or from an HTTP API on the LAN.
//!
//! ## Architecture
//! - **Pattern thread** (std::thread): one per running pattern, owned by the engine
//! - **Menu** (stdin + Ctrl+C): blocking loop on the main thread
//! - **HTTP server** (tokio/axum): handlers call the controller via `spawn_blocking`
//!
//! ## Rust concepts
//! - clap derive with subcommands and comma-separated list arguments
//! - `#[tokio::main]` on a helper function, so only `serve` starts a runtime
//! - Graceful shutdown: `with_graceful_shutdown` on Ctrl+C or SIGTERM, then cleanup
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/led-pattern-rs                      # interactive menu
//! sudo ./target/release/led-pattern-rs serve --port 8080    # HTTP API
//! ./target/release/led-pattern-rs --simulate menu           # no hardware
//! ```

use clap::{Parser, Subcommand};
use led_pattern_rs::controller::Controller;
use led_pattern_rs::server::{self, AppState};
use led_pattern_rs::{ChannelLayout, DEFAULT_DIGITAL_PINS, DEFAULT_PWM_PINS, create_driver, menu};
use std::error::Error;
use std::sync::PoisonError;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// LED Pattern Controller
#[derive(Parser)]
#[command(name = "led-pattern-rs")]
#[command(about = "Run light patterns on GPIO-driven LEDs")]
#[command(version)]
struct Args {
    /// On/off LED pins (BCM numbering), comma-separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_DIGITAL_PINS.to_vec())]
    digital_pins: Vec<u8>,

    /// PWM-dimmable LED pins (BCM numbering), comma-separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_PWM_PINS.to_vec())]
    pwm_pins: Vec<u8>,

    /// How long to wait for a pattern to stop before abandoning it
    #[arg(long, default_value = "1000")]
    stop_timeout_ms: u64,

    /// Log LED writes instead of touching GPIO
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive menu on the terminal (default)
    Menu,
    /// HTTP API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    // RUST_LOG overrides the default level, e.g. RUST_LOG=led_pattern_rs=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let layout = ChannelLayout::from_pins(&args.digital_pins, &args.pwm_pins)?;

    tracing::info!("LED Pattern Controller v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Digital pins: {:?}", layout.digital_pins());
    tracing::info!("PWM pins: {:?}", layout.pwm_pins());

    let driver = create_driver(&layout, args.simulate)?;
    let mut controller = Controller::new(
        &layout,
        driver,
        Duration::from_millis(args.stop_timeout_ms),
    )?;

    match args.command.unwrap_or(Command::Menu) {
        Command::Menu => menu::run(&mut controller),
        Command::Serve { port } => serve(controller, port),
    }
}

#[tokio::main]
async fn serve(controller: Controller, port: u16) -> Result<(), Box<dyn Error>> {
    let state = AppState::new(controller);
    let app = server::create_router(state.clone());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Runs until Ctrl+C or SIGTERM, then lets in-flight requests finish.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal()?)
        .await?;

    let controller = state.controller.clone();
    tokio::task::spawn_blocking(move || {
        controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown()
    })
    .await??;
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM (what systemd sends on `stop`).
///
/// The SIGTERM handler is installed before this returns, so a signal that
/// arrives before the future is first polled is not lost.
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        tracing::info!("Shutting down LED controller...");
    })
}
