//! # NCMILL Runner
//!
//! Runs an NC program end to end: the interpreter feeds canonical
//! commands through the bounded look-ahead queue into the trajectory
//! executor, while the bridge replicates machine status at a fixed
//! cadence and optionally publishes it over TCP.
//!
//! ```text
//! program.ngc ─► Interpreter ─► CommandProducer ═(queue)═► Executor
//!                                                             │
//!      TCP consumers ◄─ Replicator ◄─ StatusReader ◄── StatusWriter
//! ```
//!
//! Threads: the executor runs on its own (optionally RT-scheduled)
//! thread, the replicator on another; the interpreter feed loop stays
//! on the main thread and parks in `enqueue_blocking` for back-pressure.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use ncmill_bridge::{CompletionWatcher, StatusReplicator, TcpPublisher};
use ncmill_common::config::{ConfigLoader, NcConfig};
use ncmill_common::consts::DEFAULT_CONFIG_PATH;
use ncmill_common::error::NcError;
use ncmill_interp::{Interpreter, Program};
use ncmill_motion::{
    channel, rt_setup, status_buffer, CommandProducer, CycleStats, ExecutorConfig,
    TrajectoryExecutor,
};

/// NCMILL — NC program interpreter and motion executor
#[derive(Parser, Debug)]
#[command(name = "ncmill")]
#[command(version)]
#[command(about = "Interpret an NC program and drive the simulated machine")]
struct Args {
    /// NC program to run (RS274 G-code).
    program: PathBuf,

    /// Configuration TOML. Falls back to the system path when present,
    /// built-in defaults otherwise.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Look-ahead depth: maximum unacknowledged commands in the queue.
    #[arg(long, value_name = "N")]
    lookahead_depth: Option<usize>,

    /// Status replication cadence [ms].
    #[arg(long, value_name = "MS")]
    cadence_ms: Option<u64>,

    /// Executor cycle time [µs].
    #[arg(long, value_name = "US")]
    cycle_time_us: Option<u64>,

    /// Publish status as newline-delimited JSON on this address
    /// (e.g. 127.0.0.1:5140).
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// CPU core to pin the executor thread to (rt builds).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority for the executor thread (rt builds).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("NCMILL v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("NCMILL shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;
    info!(
        depth = config.lookahead_depth,
        cycle_time_us = config.cycle_time_us,
        cadence_ms = config.status_cadence_ms,
        "config OK"
    );

    let program = Program::from_file(&args.program)?;
    info!(program = program.name(), "program loaded");
    let mut interp = Interpreter::with_config(program, &config)?;

    let (tx, rx) = channel(config.lookahead_depth);
    let (writer, reader) = status_buffer();

    // Executor thread; RT setup happens on the thread itself.
    let mut executor = TrajectoryExecutor::new(
        rx,
        writer,
        ExecutorConfig {
            cycle_time_us: config.cycle_time_us,
            ..ExecutorConfig::default()
        },
    );
    let exec_shutdown = executor.shutdown_flag();
    let cpu_core = args.cpu_core;
    let rt_priority = args.rt_priority;
    let exec_handle = thread::Builder::new()
        .name("ncmill-exec".into())
        .spawn(move || {
            if let Err(e) = rt_setup(cpu_core, rt_priority) {
                return (Err(e), CycleStats::new());
            }
            let result = executor.run();
            (result, executor.stats().clone())
        })?;

    // Replicator thread, with an optional TCP sink.
    let mut replicator = StatusReplicator::new(
        reader.clone(),
        Duration::from_millis(config.status_cadence_ms),
    );
    if let Some(addr) = &args.listen {
        replicator.add_sink(Box::new(TcpPublisher::bind(addr.as_str())?));
    }
    let replicator_stop = replicator.stop_flag();
    let replicator_handle = thread::Builder::new()
        .name("ncmill-bridge".into())
        .spawn(move || replicator.run())?;

    // Ctrl-C stops the interpreter at the next block boundary.
    let abort = interp.abort_flag();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        abort.store(true, Ordering::SeqCst);
    })?;

    let mut watcher = CompletionWatcher::new(reader);
    let feed_result = feed(&mut interp, tx, &mut watcher, &config);

    // The feed is done one way or another; stop the motion side.
    match &feed_result {
        Ok(FeedOutcome::Completed) => {
            if watcher.wait_drained(Duration::from_secs(600), Duration::from_millis(10)) {
                info!(completed = %watcher.completed(), "program drained");
            }
        }
        Ok(FeedOutcome::Aborted) => warn!("run aborted by operator"),
        Err(err) => error!(%err, "feed stopped"),
    }
    exec_shutdown.store(true, Ordering::SeqCst);
    replicator_stop.store(false, Ordering::SeqCst);

    let (exec_result, stats) = exec_handle
        .join()
        .map_err(|_| "executor thread panicked")?;
    replicator_handle
        .join()
        .map_err(|_| "replicator thread panicked")?;

    info!(
        cycles = stats.cycle_count,
        avg_cycle_ns = stats.avg_cycle_ns(),
        max_cycle_ns = stats.max_cycle_ns,
        overruns = stats.overruns,
        "executor statistics"
    );

    exec_result?;
    feed_result?;
    Ok(())
}

enum FeedOutcome {
    Completed,
    Aborted,
}

/// Interpreter feed loop: emit block by block, park in
/// `enqueue_blocking` when the look-ahead depth is reached. A stall
/// alarm is surfaced and the enqueue retried; everything else stops the
/// run and aborts the queue.
fn feed(
    interp: &mut Interpreter,
    mut tx: CommandProducer,
    watcher: &mut CompletionWatcher,
    config: &NcConfig,
) -> Result<FeedOutcome, NcError> {
    let stall = Duration::from_millis(config.stall_alarm_ms);
    let abort = interp.abort_flag();
    interp.start()?;

    loop {
        let cmds = match interp.next_commands() {
            Ok(Some(cmds)) => cmds,
            Ok(None) => {
                if abort.load(Ordering::Relaxed) {
                    tx.abort();
                    return Ok(FeedOutcome::Aborted);
                }
                return Ok(FeedOutcome::Completed);
            }
            Err(err) => {
                tx.abort();
                return Err(err);
            }
        };
        for cmd in cmds {
            watcher.record_enqueued(cmd.seq);
            loop {
                match tx.enqueue_blocking(cmd, stall) {
                    Ok(()) => break,
                    // Advisory: operators see the warning, feeding resumes.
                    Err(NcError::StallAlarm { .. }) => {
                        if abort.load(Ordering::Relaxed) {
                            tx.abort();
                            return Ok(FeedOutcome::Aborted);
                        }
                    }
                    Err(err) => {
                        tx.abort();
                        return Err(err);
                    }
                }
            }
        }
    }
}

fn load_config(args: &Args) -> Result<NcConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => NcConfig::load(path)?,
        None => {
            let system = std::path::Path::new(DEFAULT_CONFIG_PATH);
            if system.exists() {
                info!(path = DEFAULT_CONFIG_PATH, "using system configuration");
                NcConfig::load(system)?
            } else {
                NcConfig::default()
            }
        }
    };
    if let Some(depth) = args.lookahead_depth {
        config.lookahead_depth = depth;
    }
    if let Some(cadence) = args.cadence_ms {
        config.status_cadence_ms = cadence;
    }
    if let Some(cycle) = args.cycle_time_us {
        config.cycle_time_us = cycle;
    }
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
