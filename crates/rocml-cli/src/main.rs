use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rocml_core::RocmlConfig;
use rocml_services::{
    init_process_session, ContextStatus, DeviceDirectory, DeviceSession, GpuMetricsRegistrar,
    SessionState, SystemMonitor, TelemetryCollector, WorkerMetrics,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rocml")]
#[command(about = "Inspect ROCm GPU sessions and telemetry", long_about = None)]
struct Cli {
    /// JSON config file (defaults, then file, then ROCML_* environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show session state and the visible device
    Status,

    /// Static properties of the visible GPU
    OneTime,

    /// Current utilization and memory use of the visible GPU
    RealTime,

    /// Whether this process holds a GPU context, and on which device
    Context,

    /// Worker startup information and one heartbeat, as a worker would report them
    Worker,

    /// Poll the visible GPU until interrupted
    Watch {
        /// Poll interval in milliseconds (defaults to monitor.interval_ms)
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Stop after this many polls
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

#[derive(Serialize)]
struct Status {
    state: String,
    owner_pid: Option<u32>,
    device_count: u32,
    visible_device: Option<u32>,
    context: ContextStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = RocmlConfig::resolve(cli.config.as_deref())?;
    debug!("Resolved config: {:?}", config);

    let session = init_process_session(&config);
    let directory = DeviceDirectory::with_visibility_var(
        session.clone(),
        config.diagnostics.visible_devices_var.clone(),
    );
    let collector = TelemetryCollector::new(directory.clone());

    match cli.command {
        Commands::Status => cmd_status(&directory, cli.output)?,
        Commands::OneTime => {
            let metrics = collector.one_time()?;
            print_output(cli.output, &metrics, || {
                println!("One-time GPU metrics:");
                println!("{:-<40}", "");
                println!("  Name:          {}", metrics.name.as_deref().unwrap_or("-"));
                println!("  Memory total:  {}", format_bytes(metrics.memory_total));
            })?;
        }
        Commands::RealTime => {
            let metrics = collector.real_time()?;
            print_output(cli.output, &metrics, || {
                println!("Real-time GPU metrics:");
                println!("{:-<40}", "");
                println!("  Utilization:   {}", format_percent(metrics.utilization));
                println!("  Memory used:   {}", format_bytes(metrics.memory_used));
            })?;
        }
        Commands::Context => {
            let status = directory.has_active_context();
            print_output(cli.output, &status, || match status.device() {
                Some(device) => println!(
                    "Context active on device {} ({})",
                    device.device_index,
                    device.uuid.as_deref().unwrap_or("uuid unavailable")
                ),
                None => println!("No GPU context in this process"),
            })?;
        }
        Commands::Worker => cmd_worker(&session, &collector, &config, cli.output)?,
        Commands::Watch { interval_ms, count } => {
            let mut monitor_config = config.monitor.clone();
            if let Some(ms) = interval_ms {
                monitor_config.interval_ms = ms;
            }
            cmd_watch(collector, &monitor_config, count, cli.output).await?
        }
    }

    Ok(())
}

fn cmd_status(directory: &DeviceDirectory, output: OutputFormat) -> Result<()> {
    let device_count = directory.device_count();
    let visible_device = directory
        .resolve_visible_device()
        .ok()
        .map(|handle| directory.index_of(handle));
    let context = directory.has_active_context();
    let session = directory.session();

    let status = Status {
        state: session.state().to_string(),
        owner_pid: session.owner_pid(),
        device_count,
        visible_device,
        context,
    };

    print_output(output, &status, || {
        println!("GPU Session Status:");
        println!("{:-<40}", "");
        println!("  State:          {}", status.state);
        println!(
            "  Owner PID:      {}",
            status.owner_pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
        );
        println!("  Devices:        {}", status.device_count);
        println!(
            "  Visible device: {}",
            status.visible_device.map(|i| i.to_string()).unwrap_or_else(|| "-".into())
        );
        println!(
            "  Context:        {}",
            status
                .context
                .device()
                .map(|d| format!("device {}", d.device_index))
                .unwrap_or_else(|| "none".into())
        );
    })
}

fn cmd_worker(
    session: &Arc<DeviceSession>,
    collector: &TelemetryCollector,
    config: &RocmlConfig,
    output: OutputFormat,
) -> Result<()> {
    let metrics = Arc::new(WorkerMetrics::new());
    GpuMetricsRegistrar::install(&metrics, session, config.diagnostics.visible_devices_var.clone());

    // First telemetry read initializes the session, which fires the hook
    if let Err(e) = collector.one_time() {
        info!("GPU telemetry unavailable: {}", e);
    }

    let report = serde_json::json!({
        "startup-information": metrics.startup_information(),
        "heartbeat": metrics.heartbeat(),
    });

    print_output(output, &report, || {
        println!("Worker GPU report:");
        println!("{:-<40}", "");
        if report["heartbeat"].as_object().is_some_and(|m| m.is_empty()) {
            println!("  No GPU metrics registered (state: {})", session.state());
            return;
        }
        println!("  Startup:   {}", report["startup-information"]);
        println!("  Heartbeat: {}", report["heartbeat"]);
    })
}

async fn cmd_watch(
    collector: TelemetryCollector,
    config: &rocml_core::MonitorConfig,
    count: Option<u64>,
    output: OutputFormat,
) -> Result<()> {
    let session = collector.session().clone();
    let monitor = Arc::new(SystemMonitor::new(collector, config));
    let mut polls = 0u64;
    let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));

    if matches!(output, OutputFormat::Table) {
        println!("{:<18} {:>12} {:>16}", "time", "utilization", "memory used");
        println!("{:-<48}", "");
    }

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
        }

        let poller = monitor.clone();
        let sample = tokio::task::spawn_blocking(move || poller.update()).await?;
        polls += 1;

        match (sample, output) {
            (Some(sample), OutputFormat::Json) => println!("{}", serde_json::to_string(&sample)?),
            (Some(sample), OutputFormat::Table) => println!(
                "{:<18.3} {:>12} {:>16}",
                sample.time,
                format_percent(sample.gpu_utilization),
                format_bytes(sample.gpu_memory_used)
            ),
            (None, _) => debug!("No GPU sample this tick"),
        }

        if watch_finished(polls, count, session.state()) {
            break;
        }
    }

    if matches!(output, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&monitor.info(0))?);
    }

    Ok(())
}

/// A disabled session never yields samples, so waiting on it would spin forever
fn watch_finished(polls: u64, count: Option<u64>, state: SessionState) -> bool {
    if state.is_disabled() {
        warn!("GPU telemetry is {}, stopping watch", state);
        return true;
    }
    count.is_some_and(|n| polls >= n)
}

fn print_output<T: Serialize>(output: OutputFormat, value: &T, table: impl FnOnce()) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => {
            println!();
            table();
            println!();
        }
    }
    Ok(())
}

fn format_bytes(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) if b >= 1 << 30 => format!("{:.2} GiB", b as f64 / (1u64 << 30) as f64),
        Some(b) => format!("{:.1} MiB", b as f64 / (1u64 << 20) as f64),
        None => "-".to_string(),
    }
}

fn format_percent(value: Option<u32>) -> String {
    value.map(|v| format!("{}%", v)).unwrap_or_else(|| "-".to_string())
}
