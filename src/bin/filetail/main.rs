// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use filetail::init::args::TailArgs;
use filetail::tail::{TailEvent, TailOrchestrator};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "filetail")]
#[command(bin_name = "filetail")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "FILETAIL_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    tail: TailArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_tailer(&opt.tail) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Failed to run tailer.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run_tailer(args: &TailArgs) -> Result<(), BoxError> {
    let config = args.build_config();
    let tailer = TailOrchestrator::start(config)?;

    let mut shutdown = Box::pin(signal_wait());
    let mut stdout = io::stdout().lock();
    loop {
        select! {
            res = &mut shutdown => {
                res?;
                info!("Shutdown signal received.");
                break;
            },
            event = tailer.read_one_event() => {
                match event {
                    Some(event) => {
                        if let Err(e) = write_event(&mut stdout, &event) {
                            error!(error = %e, "Failed to write record to stdout");
                            break;
                        }
                    }
                    None => {
                        warn!("Unexpected end of tailed records.");
                        break;
                    }
                }
            },
        }
    }
    drop(stdout);

    tailer.shutdown().await?;
    Ok(())
}

fn write_event(out: &mut impl Write, event: &TailEvent) -> Result<(), BoxError> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // Records go to stdout, so logs go to stderr
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

async fn signal_wait() -> io::Result<()> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
