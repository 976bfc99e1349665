use obcdeploy::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn test_config() -> DeploymentConfig {
    DeploymentConfig {
        hub_address: "127.0.0.1".to_string(),
        hub_port: 0,
        ..DeploymentConfig::default()
    }
}

#[test]
fn test_stop_before_start_performs_no_ticks() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();
    topology.setup(&state).unwrap();

    topology.stop_simulated_cycle();
    let ticks = topology.start_simulated_cycle(Duration::from_millis(1)).unwrap();
    assert_eq!(ticks, 0);
    assert_eq!(topology.components().rate_group_driver.ticks(), 0);

    topology.teardown(&state).unwrap();
}

#[test]
fn test_at_most_one_tick_after_stop_returns() {
    let clock = Arc::new(SimulatedClock::new());
    let count = Arc::new(AtomicU64::new(0));

    let runner = {
        let clock = Arc::clone(&clock);
        let count = Arc::clone(&count);
        thread::spawn(move || {
            clock.start(Duration::from_millis(2), || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    };

    while count.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    clock.stop();
    let at_stop = count.load(Ordering::SeqCst);

    let ticks = runner.join().unwrap();
    let after = count.load(Ordering::SeqCst);
    assert!(after <= at_stop + 1, "ticked {after} times after stop observed {at_stop}");
    assert_eq!(ticks, after);
}

#[test]
fn test_stop_from_another_thread_ends_cycle() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();
    topology.setup(&state).unwrap();

    let control = topology.cycle_control();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        control.stop();
    });

    let began = Instant::now();
    // A long interval: stop must wake the wait rather than sleep it out.
    let ticks = topology.start_simulated_cycle(Duration::from_secs(60)).unwrap();
    stopper.join().unwrap();

    assert_eq!(ticks, 1);
    assert!(began.elapsed() < Duration::from_secs(30));
    assert_eq!(topology.components().rate_group_driver.ticks(), 1);

    topology.teardown(&state).unwrap();
}

#[test]
fn test_cycle_requires_running_tasks() {
    let mut topology = Topology::new(test_config());
    let result = topology.start_simulated_cycle(Duration::from_millis(1));
    assert!(matches!(
        result,
        Err(TopologyError::OutOfOrder {
            actual: LifecycleState::Uninitialized,
            ..
        })
    ));
}

#[test]
fn test_stopped_clock_stays_stopped() {
    let clock = SimulatedClock::new();
    clock.stop();
    clock.stop();
    assert!(clock.is_stopped());
    assert_eq!(clock.start(Duration::from_millis(1), || {}), 0);
    assert_eq!(clock.start(Duration::from_millis(1), || {}), 0);
}

#[test]
fn test_stop_before_setup_is_kept() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();
    let early = topology.cycle_control();
    topology.stop_simulated_cycle();

    topology.setup(&state).unwrap();
    assert!(Arc::ptr_eq(&early, &topology.cycle_control()));
    assert!(topology.cycle_control().is_stopped());

    let ticks = topology.start_simulated_cycle(Duration::from_millis(5)).unwrap();
    assert_eq!(ticks, 0);
    assert_eq!(topology.components().rate_group_driver.ticks(), 0);

    topology.teardown(&state).unwrap();
}

#[test]
fn test_handle_taken_before_setup_stops_cycle() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();
    let control = topology.cycle_control();

    topology.setup(&state).unwrap();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        control.stop();
    });

    let began = Instant::now();
    let ticks = topology.start_simulated_cycle(Duration::from_secs(60)).unwrap();
    stopper.join().unwrap();
    assert_eq!(ticks, 1);
    assert!(began.elapsed() < Duration::from_secs(30));

    topology.teardown(&state).unwrap();
}

#[test]
fn test_stop_survives_repeated_setup() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();

    topology.setup(&state).unwrap();
    topology.stop_simulated_cycle();
    topology.teardown(&state).unwrap();

    topology.setup(&state).unwrap();
    assert_eq!(topology.start_simulated_cycle(Duration::from_millis(1)).unwrap(), 0);
    topology.teardown(&state).unwrap();
}
