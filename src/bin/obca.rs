use clap::{App, Arg};
use colored::*;
use obcdeploy::logging;
use obcdeploy::{DeploymentConfig, SimulatedClock, Topology, TopologyState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PORT: &str = "0";
const DEFAULT_INTERVAL_MS: &str = "1000";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("obca")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("obcA deployment - brings up the flight computer topology on a simulated clock")
        .arg(
            Arg::with_name("address")
                .short("a")
                .long("address")
                .value_name("HOST")
                .help("Uplink endpoint host; without it no uplink task is started")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Uplink endpoint port")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON file overriding deployment constants")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval-ms")
                .short("i")
                .long("interval-ms")
                .value_name("MS")
                .help("Simulated cycle interval in milliseconds")
                .takes_value(true)
                .default_value(DEFAULT_INTERVAL_MS),
        )
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("COUNT")
                .help("Stop after this many cycles (default: run until interrupted)")
                .takes_value(true),
        )
        .get_matches();

    if let Err(e) = logging::init_logging() {
        eprintln!("{} {}", "warning:".yellow(), e);
    }

    let config = match matches.value_of("config") {
        Some(path) => DeploymentConfig::from_file(path)?,
        None => DeploymentConfig::default(),
    };
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let interval_ms: u64 = matches.value_of("interval-ms").unwrap_or(DEFAULT_INTERVAL_MS).parse()?;
    let cycles: Option<u64> = matches.value_of("cycles").map(str::parse).transpose()?;
    let state = match matches.value_of("address") {
        Some(host) => TopologyState::new(host, port),
        None => TopologyState::without_network(),
    };

    println!("{}", "obcA deployment".bold());
    println!("{}", "================".bold());

    let mut topology = Topology::new(config);
    if let Err(e) = topology.setup(&state) {
        eprintln!("{} {}", "setup failed:".red().bold(), e);
        if let Err(report) = topology.teardown(&state) {
            for failure in &report.failures {
                eprintln!("  {} {}", "✗".red(), failure);
            }
        }
        std::process::exit(1);
    }
    println!("{} topology running", "✓".green());

    let control = topology.cycle_control();
    spawn_interrupt_watcher(Arc::clone(&control))?;

    let interval = Duration::from_millis(interval_ms);
    let mut remaining = cycles;
    let ticks = control.start(interval, || {
        topology.tick();
        if let Some(left) = remaining.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                control.stop();
            }
        }
    });
    info!(ticks, "cycling finished");

    match topology.teardown(&state) {
        Ok(()) => println!("{} teardown complete after {} cycles", "✓".green(), ticks),
        Err(report) => {
            eprintln!("{} {}", "teardown:".yellow().bold(), report);
            for failure in &report.failures {
                eprintln!("  {} {}", "✗".red(), failure);
            }
        }
    }

    Ok(())
}

/// Stops the cycle on Ctrl+C.
fn spawn_interrupt_watcher(control: Arc<SimulatedClock>) -> std::io::Result<()> {
    thread::Builder::new().name("interrupt".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "interrupt watcher unavailable");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping cycle");
                control.stop();
            }
        });
    })?;
    Ok(())
}
