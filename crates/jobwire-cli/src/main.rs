//! Jobwire CLI - issue one job against a jobwire server.
//!
//! Progress is written to stderr, the result (or the classified failure) to
//! stdout as JSON.

mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jobwire::{
    CallOptions, Dispatcher, ErrorCatalog, JobwireError, Progress, ProtocolConfig, TcpChannel,
};
use serde_json::{json, Value};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use settings::CliSettings;

#[derive(Parser, Debug)]
#[command(name = "jobwire")]
#[command(about = "Run a job on a jobwire server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    addr: SocketAddr,

    /// Method to call
    #[arg(short, long)]
    method: String,

    /// Call parameters as a JSON array or object
    #[arg(short, long)]
    params: Option<String>,

    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request cancellation after this many seconds
    #[arg(long)]
    cancel_after: Option<f64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(args: &Args) {
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print_progress(progress: &Progress) {
    let message = progress.message.as_deref().unwrap_or("");
    match (progress.fraction(), progress.worked, progress.total) {
        (Some(fraction), _, _) => eprintln!("[{:>5.1}%] {}", fraction * 100.0, message),
        (None, Some(worked), None) => eprintln!("[{}] {}", worked, message),
        _ => eprintln!("[...] {}", message),
    }
}

/// Print a server failure with its presentation and pick the exit code.
fn report_failure(error: &JobwireError, catalog: &ErrorCatalog) -> Result<ExitCode> {
    let Some(failure) = error.failure() else {
        return Err(anyhow::anyhow!("{}", error));
    };

    let classification = catalog.classify(failure);
    eprintln!("{}: {}", classification.presentation.title, failure.message);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "error": failure,
            "classification": classification,
        }))?
    );

    if error.is_cancelled() {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args);

    let settings = match &args.config {
        Some(path) => CliSettings::load(path)?,
        None => CliSettings::default(),
    };

    let params = match &args.params {
        Some(raw) => serde_json::from_str::<Value>(raw).context("--params is not valid JSON")?,
        None => Value::Null,
    };

    let (channel, events) = TcpChannel::connect_with(
        args.addr,
        ProtocolConfig::CONNECT_TIMEOUT,
        settings.dispatcher.max_frame_size,
    )
    .await
    .with_context(|| format!("Failed to connect to {}", args.addr))?;

    let dispatcher = Dispatcher::builder()
        .config(settings.dispatcher.clone())
        .spawn(channel, events);

    let mut handle = dispatcher.call_with(
        args.method.as_str(),
        params,
        CallOptions::new().on_progress(print_progress),
    )?;
    let id = handle.id();
    info!("Started job {} ({})", id, args.method);

    if let Some(secs) = args.cancel_after {
        let delay =
            Duration::try_from_secs_f64(secs).context("--cancel-after must be non-negative")?;
        let canceller = dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Cancelling job {} after {:?}", id, delay);
            canceller.cancel(id);
        });
    }

    let outcome = tokio::select! {
        outcome = &mut handle => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job {}", id);
            dispatcher.cancel(id);
            handle.await
        }
    };

    dispatcher.close();

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&e, &settings.errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwire::RpcFailure;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "jobwire",
            "--addr",
            "127.0.0.1:7000",
            "--method",
            "longTask",
            "--params",
            r#"{"size": 3}"#,
            "--cancel-after",
            "1.5",
        ])
        .unwrap();
        assert_eq!(args.addr.port(), 7000);
        assert_eq!(args.method, "longTask");
        assert_eq!(args.cancel_after, Some(1.5));
        assert!(!args.debug);
    }

    #[test]
    fn test_method_is_required() {
        assert!(Args::try_parse_from(["jobwire"]).is_err());
    }

    #[test]
    fn test_cancelled_failure_exits_with_two() {
        let error = JobwireError::Cancelled {
            id: 1,
            failure: RpcFailure {
                code: 999,
                message: "cancelled".to_string(),
                data: None,
            },
        };
        let code = report_failure(&error, ErrorCatalog::builtin()).unwrap();
        assert_eq!(code, ExitCode::from(2));
    }

    #[test]
    fn test_local_error_is_propagated() {
        let error = JobwireError::NotConnected;
        assert!(report_failure(&error, ErrorCatalog::builtin()).is_err());
    }
}
