mod bus;
mod config;
mod error;
mod hardware;
mod messages;
mod scheduler;
mod session;

use std::future::Future;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::Topic;
use crate::config::{DEFAULT_CONFIG_PATH, load_settings};
use crate::hardware::{EncoderBus, OpenChannels, SimulatedBus};
use crate::messages::{OdometryRecord, Outputs, PathLengthRecord, ResetCommand, TransformRecord};
use crate::scheduler::CycleStats;
use crate::session::{Session, SharedSession};

const OUTPUT_CAPACITY: usize = 16;
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let node = load_settings(&path)?.validate()?;
    info!(
        rate_hz = node.rate_hz,
        drive = %node.drive,
        bounds = %node.bounds,
        offset = node.offset,
        "Configuration validated."
    );

    let bus = SimulatedBus::from_config(&node);
    let channels = OpenChannels::open(bus, node.left_handle, node.right_handle)?;
    let session = Session::from_config(channels, &node, Instant::now()).into_shared();

    let outputs = Outputs::new(node.frames.clone(), OUTPUT_CAPACITY);
    let subscriptions = Subscriptions::new(&outputs);
    outputs.publish_path_length(0.0);

    let resets: Topic<ResetCommand> = Topic::new(4);
    let reset_rx = resets.subscribe();
    spawn_console(resets, Arc::clone(&session))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    info!("Spawning odometry thread...");
    let odometry = scheduler::spawn(Arc::clone(&session), outputs, Arc::clone(&shutdown))?;

    let tasks = async {
        tokio::select! {
            res = async {
                tokio::try_join!(
                    reset_listener(Arc::clone(&session), reset_rx),
                    report(subscriptions),
                )
                .map(|_| ())
            } => res,
            res = tokio::signal::ctrl_c() => res
                .map_err(anyhow::Error::from)
                .map(|()| info!("Interrupt received, shutting down.")),
        }
    };

    let stats = supervise(tasks, odometry, shutdown).await?;
    info!(?stats, "Odometry node stopped.");
    Ok(())
}

/// Runs `tasks` until they finish or the odometry thread exits on its own,
/// then stops and joins the thread. Every path sets `shutdown`, so the
/// thread always closes the encoder channels.
async fn supervise<F>(
    tasks: F,
    odometry: JoinHandle<CycleStats>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<CycleStats>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let mut joined = tokio::task::spawn_blocking(move || odometry.join());
    let mut exited = None;

    let served = tokio::select! {
        res = tasks => res,
        res = &mut joined => {
            exited = Some(res);
            Err(anyhow!("odometry thread exited unexpectedly"))
        }
    };

    shutdown.store(true, Ordering::Release);
    let res = match exited {
        Some(res) => res,
        None => joined.await,
    };
    let stats = res?.map_err(|_| anyhow!("odometry thread panicked"))?;

    if let Err(e) = &served {
        error!(error = %e, ?stats, "Odometry node failed.");
    }
    served.map(|()| stats)
}

/// Applies reset requests to the session as they arrive.
async fn reset_listener<B: EncoderBus>(
    session: SharedSession<B>,
    mut reset_rx: broadcast::Receiver<Arc<ResetCommand>>,
) -> anyhow::Result<()> {
    info!("Reset listener started.");
    loop {
        match reset_rx.recv().await {
            Ok(_) => {
                if let Err(e) = session.lock().reset(Instant::now()) {
                    warn!(error = %e, "Reset left the encoder channels uninitialized.");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Coalesced queued reset requests.");
            }
            Err(RecvError::Closed) => {
                info!("Reset topic closed.");
                return Ok(());
            }
        }
    }
}

/// Receivers for the three output topics, taken before anything is published.
struct Subscriptions {
    odometry: broadcast::Receiver<Arc<OdometryRecord>>,
    path_length: broadcast::Receiver<Arc<PathLengthRecord>>,
    transform: broadcast::Receiver<Arc<TransformRecord>>,
}

impl Subscriptions {
    fn new(outputs: &Outputs) -> Self {
        Subscriptions {
            odometry: outputs.odometry.subscribe(),
            path_length: outputs.path_length.subscribe(),
            transform: outputs.transform.subscribe(),
        }
    }
}

/// Keeps the newest message; a lagged receiver just skips ahead.
fn newest<T>(msg: Result<Arc<T>, RecvError>, topic: &str) -> anyhow::Result<Option<Arc<T>>> {
    match msg {
        Ok(msg) => Ok(Some(msg)),
        Err(RecvError::Lagged(_)) => Ok(None),
        Err(RecvError::Closed) => Err(anyhow!("{} topic closed", topic)),
    }
}

/// Logs the latest outputs at a human-readable rate. Fails once the odometry
/// thread has dropped its publishers.
async fn report(mut subs: Subscriptions) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(REPORT_INTERVAL);
    let mut odometry: Option<Arc<OdometryRecord>> = None;
    let mut path_length: Option<Arc<PathLengthRecord>> = None;
    let mut transform: Option<Arc<TransformRecord>> = None;
    loop {
        tokio::select! {
            msg = subs.odometry.recv() => {
                if let Some(msg) = newest(msg, "odometry")? {
                    odometry = Some(msg);
                }
            }
            msg = subs.path_length.recv() => {
                if let Some(msg) = newest(msg, "path length")? {
                    path_length = Some(msg);
                }
            }
            msg = subs.transform.recv() => {
                if let Some(msg) = newest(msg, "transform")? {
                    transform = Some(msg);
                }
            }
            _ = tick.tick() => {
                if let Some(record) = odometry.take() {
                    info!(
                        seq = record.header.seq,
                        x = record.position.x,
                        y = record.position.y,
                        vx = record.twist.vx,
                        wz = record.twist.wz,
                        "Odometry."
                    );
                }
                if let Some(record) = transform.take() {
                    debug!(
                        parent = %record.parent_frame_id,
                        child = %record.child_frame_id,
                        x = record.translation.x,
                        y = record.translation.y,
                        "Transform."
                    );
                }
                if let Some(record) = path_length.take() {
                    info!(path_length = record.value, "Path length.");
                }
            }
        }
    }
}

/// Reads operator commands from stdin on a plain thread so a blocked read
/// never holds up runtime shutdown.
fn spawn_console<B: EncoderBus + 'static>(
    resets: Topic<ResetCommand>,
    session: SharedSession<B>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            info!("Console ready: `reset` zeroes the estimate, `status` prints it.");
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Console read failed.");
                        break;
                    }
                };
                match line.trim() {
                    "reset" => {
                        let listeners = resets.publish(ResetCommand);
                        debug!(listeners, "Reset requested.");
                    }
                    "status" => {
                        let snap = session.lock().snapshot();
                        info!(
                            pose = %snap.pose,
                            twist = %snap.twist,
                            path_length = snap.path_length,
                            next_seq = snap.next_seq,
                            left_ticks = snap.left_ticks,
                            right_ticks = snap.right_ticks,
                            left_wraps = snap.left_multiplier,
                            right_wraps = snap.right_multiplier,
                            fault_count = snap.fault_count,
                            faults = ?snap.faults,
                            "Status."
                        );
                    }
                    "" => {}
                    other => warn!(command = other, "Unknown console command."),
                }
            }
        })?;
    Ok(())
}
