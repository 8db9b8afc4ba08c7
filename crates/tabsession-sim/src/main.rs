//! tabsession simulator - runs several browser-like tabs against one
//! session bus and logs how renewal, idle warnings and logouts propagate.

mod simulated;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tabsession_core::{
    Clock, Config, InputKind, InvalidationRegistry, InvalidationWorker, SessionBus,
    SessionController, SessionPolicy, SystemClock, TabEvent, TabHandle, TabId, TabRuntime,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use simulated::{LoggingRefresher, SimulatedAuth};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_TABS: usize = 3;

const DEFAULT_DURATION_SECS: u64 = 40;

/// Demo-friendly policy; real deployments use the config file.
const SIM_IDLE_SECS: u64 = 12;
const SIM_WARNING_SECS: u64 = 4;
const SIM_TOKEN_TTL_SECS: u64 = 8;
const SIM_REFRESH_MARGIN_SECS: u64 = 2;

#[derive(Debug)]
struct Args {
    tabs: usize,
    duration: Duration,
    log_dir: Option<String>,
    use_config: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        tabs: DEFAULT_TABS,
        duration: Duration::from_secs(DEFAULT_DURATION_SECS),
        log_dir: None,
        use_config: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tabs" => {
                let value = iter.next().context("--tabs needs a value")?;
                args.tabs = value.parse().context("--tabs must be a number")?;
            }
            "--duration-secs" => {
                let value = iter.next().context("--duration-secs needs a value")?;
                args.duration = Duration::from_secs(value.parse().context("--duration-secs must be a number")?);
            }
            "--log-dir" => {
                args.log_dir = Some(iter.next().context("--log-dir needs a value")?);
            }
            "--use-config" => args.use_config = true,
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }
    Ok(args)
}

/// Initialize the tracing subscriber for logging.
/// The guard must be held for the life of the program when logging to a file.
fn init_tracing(log_dir: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tabsession.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn env_secs(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %value, "Ignoring non-numeric override");
            default
        }),
        Err(_) => default,
    }
}

/// Policy from the config file, or the simulator defaults, with env overrides.
fn load_policy(use_config: bool) -> Result<(SessionPolicy, Duration)> {
    let mut config = if use_config {
        Config::load()?
    } else {
        Config {
            idle_timeout_secs: SIM_IDLE_SECS,
            warning_window_secs: SIM_WARNING_SECS,
            refresh_margin_secs: SIM_REFRESH_MARGIN_SECS,
            ..Config::default()
        }
    };
    config.idle_timeout_secs = env_secs("TABSESSION_IDLE_SECS", config.idle_timeout_secs);
    config.warning_window_secs = env_secs("TABSESSION_WARNING_SECS", config.warning_window_secs);
    let ttl = Duration::from_secs(env_secs("TABSESSION_TOKEN_TTL_SECS", SIM_TOKEN_TTL_SECS));

    let policy = config.policy().context("Invalid session policy")?;
    Ok((policy, ttl))
}

struct SimTab {
    label: String,
    handle: TabHandle,
}

fn open_tab(
    index: usize,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    bus: Option<&SessionBus>,
    ttl: Duration,
) -> Result<SimTab> {
    let label = format!("tab-{}", index + 1);
    let credentials = Arc::new(SimulatedAuth::signed_in(label.clone(), clock.clone(), ttl)?);
    let controller = SessionController::attach(TabId::random(), policy, clock, credentials, bus);
    Ok(SimTab {
        label,
        handle: TabRuntime::spawn(controller),
    })
}

/// Spawn a task that logs every view change of a tab.
fn watch_tab(tab: &SimTab) {
    let label = tab.label.clone();
    let mut view = tab.handle.watch();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = *view.borrow_and_update();
            info!(
                tab = %label,
                authenticated = current.is_authenticated,
                warning = current.is_warning,
                idle = current.is_idle,
                remaining_ms = current.remaining_ms,
                "View"
            );
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    let _guard = init_tracing(args.log_dir.as_deref());
    info!(tabs = args.tabs, duration_secs = args.duration.as_secs(), "tabsession simulator starting");

    let (policy, ttl) = load_policy(args.use_config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let bus = match SessionBus::new(policy.bus_capacity) {
        Ok(bus) => Some(bus),
        Err(e) => {
            warn!(error = %e, "Session bus unavailable, tabs run independently");
            None
        }
    };

    let tabs = (0..args.tabs.max(1))
        .map(|i| open_tab(i, policy, clock.clone(), bus.as_ref(), ttl))
        .collect::<Result<Vec<_>>>()?;
    for tab in &tabs {
        watch_tab(tab);
    }

    // Entity invalidation alongside the session: a roster widget in each tab
    let registry = InvalidationRegistry::global().clone();
    let refresher = Arc::new(LoggingRefresher::default());
    let worker = InvalidationWorker::spawn(registry.clone(), refresher.clone());
    for tab in &tabs {
        registry.subscribe("students", format!(r#"["students",{{"tab":"{}"}}]"#, tab.label));
    }
    // Corrupt key: skipped with a warning, the others still refresh
    registry.subscribe("students", r#"["students","summary""#);

    run_script(&tabs, &registry, args.duration).await;

    info!(refetched = refresher.refreshed(), "Shutting down tabs");
    worker.shutdown();
    for tab in tabs {
        tab.handle.shutdown().await;
    }
    info!("tabsession simulator finished");
    Ok(())
}

/// Drive the first tab with activity for a while, hide the second one, then
/// let everything go quiet so the idle timeout signs every tab out.
async fn run_script(tabs: &[SimTab], registry: &InvalidationRegistry, duration: Duration) {
    let active_for = duration / 2;
    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    if let Some(second) = tabs.get(1) {
        info!(tab = %second.label, "Hiding tab");
        second.handle.send(TabEvent::Visibility(false)).await;
    }

    while start.elapsed() < duration {
        ticker.tick().await;
        let elapsed = start.elapsed();

        if elapsed < active_for {
            if let Some(first) = tabs.first() {
                first.handle.send(TabEvent::Input(InputKind::PointerMove)).await;
            }
            if elapsed.as_secs() % 5 == 0 {
                // A mutation lands; two invalidations in one tick share a batch
                registry.invalidate_entity("students");
                registry.invalidate_entity("students");
            }
        }

        if elapsed.as_secs() == active_for.as_secs() {
            if let Some(second) = tabs.get(1) {
                info!(tab = %second.label, "Showing tab");
                second.handle.send(TabEvent::Visibility(true)).await;
            }
            info!("User walked away");
        }
    }
}
