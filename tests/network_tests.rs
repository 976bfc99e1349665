use obcdeploy::components::framing::{DeframeStatus, DeframingProtocol, FprimeDeframing, FprimeFraming, FramingProtocol};
use obcdeploy::components::Component;
use obcdeploy::link::{response_event, CommandStatus};
use obcdeploy::network::{HUB_TASK_NAME, UPLINK_TASK_NAME};
use obcdeploy::*;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

fn test_config() -> DeploymentConfig {
    DeploymentConfig {
        hub_address: "127.0.0.1".to_string(),
        hub_port: 0,
        reconnect_interval_ms: 20,
        ..DeploymentConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    FprimeFraming::new(516).frame(payload).unwrap()
}

/// Reads one whole frame from the stream and returns its payload.
fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let deframing = FprimeDeframing::new(516);
    let mut buffer = Vec::new();
    loop {
        if let DeframeStatus::Frame { payload, .. } = deframing.deframe(&buffer) {
            return payload;
        }
        let mut chunk = [0u8; 64];
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "peer closed before a full frame arrived");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn network_events(topology: &Topology) -> Vec<&'static str> {
    topology
        .history()
        .iter()
        .filter_map(|event| match event {
            LifecycleEvent::NetworkStarted(name) => Some(*name),
            _ => None,
        })
        .collect()
}

#[test]
fn test_uplink_started_with_endpoint() {
    let ground = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = ground.local_addr().unwrap().port();

    let mut topology = Topology::new(test_config());
    let state = TopologyState::new("127.0.0.1", port);
    topology.setup(&state).unwrap();
    assert_eq!(network_events(&topology), [UPLINK_TASK_NAME, HUB_TASK_NAME]);
    assert!(topology.components().com_driver.is_running());

    // The uplink connects out to the ground station and deframes what it sends.
    let (mut link, _) = ground.accept().unwrap();
    link.write_all(&frame(b"CMD_NO_OP")).unwrap();
    link.flush().unwrap();

    let deframer = &topology.components().deframer;
    assert!(wait_until(|| deframer.decoded() == 1));
    assert_eq!(deframer.take_frames(), vec![b"CMD_NO_OP".to_vec()]);

    topology.teardown(&state).unwrap();
    assert!(!topology.components().com_driver.is_running());
}

#[test]
fn test_hub_listens_and_deframes() {
    let mut topology = Topology::new(test_config());
    let state = TopologyState::without_network();
    topology.setup(&state).unwrap();

    let addr = topology.components().hub_com_driver.local_addr().unwrap();
    let mut peer = TcpStream::connect(addr).unwrap();

    // Two frames split across writes with leading noise.
    let mut stream = vec![0x42, 0x42];
    stream.extend_from_slice(&frame(b"first"));
    stream.extend_from_slice(&frame(b"second"));
    let (head, tail) = stream.split_at(11);
    peer.write_all(head).unwrap();
    peer.flush().unwrap();
    std::thread::sleep(Duration::from_millis(10));
    peer.write_all(tail).unwrap();

    let hub_deframer = &topology.components().hub_deframer;
    assert!(wait_until(|| hub_deframer.decoded() == 2));
    assert_eq!(hub_deframer.discarded_bytes(), 2);
    assert_eq!(topology.components().hub_com_driver.stats().connections(), 1);

    drop(peer);
    topology.teardown(&state).unwrap();
}

#[test]
fn test_uplink_retries_until_teardown() {
    // Nothing listens on the uplink port; the client keeps retrying.
    let unused = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let mut topology = Topology::new(test_config());
    let state = TopologyState::new("127.0.0.1", port);
    topology.setup(&state).unwrap();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(topology.components().com_driver.stats().connections(), 0);

    topology.teardown(&state).unwrap();
}

#[test]
fn test_hub_bind_failure_aborts_setup() {
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = DeploymentConfig {
        hub_port: holder.local_addr().unwrap().port(),
        ..test_config()
    };

    let mut topology = Topology::new(config);
    let state = TopologyState::without_network();
    let err = topology.setup(&state).unwrap_err();
    assert!(matches!(err, TopologyError::Task(_)));
    assert_eq!(topology.state(), LifecycleState::Configured);

    // Component tasks that did start are stopped and resources released.
    topology.teardown(&state).unwrap();
    assert_eq!(topology.state(), LifecycleState::TornDown);
}

#[test]
fn test_save_command_executes_and_responds() {
    let ground = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = ground.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let param_file = dir.path().join("PrmDb.dat");
    let config = DeploymentConfig {
        param_file: param_file.clone(),
        ..test_config()
    };

    let mut topology = Topology::new(config);
    let state = TopologyState::new("127.0.0.1", port);
    topology.setup(&state).unwrap();
    let opcode = topology.components().prm_db.id_base().unwrap();

    let (mut link, _) = ground.accept().unwrap();
    link.write_all(&frame(&opcode.to_be_bytes())).unwrap();
    {
        let deframer = &topology.components().deframer;
        assert!(wait_until(|| deframer.queued() == 1));
    }

    let activity = topology.tick();
    assert_eq!(activity.executed, 1);
    assert_eq!(activity.downlinked, 1);
    assert_eq!(std::fs::read_to_string(&param_file).unwrap().trim(), "{}");
    assert_eq!(read_frame(&mut link), response_event(opcode, CommandStatus::Ok).to_vec());

    // An opcode nobody registered is answered, not executed.
    link.write_all(&frame(&0x0000_00FFu32.to_be_bytes())).unwrap();
    {
        let deframer = &topology.components().deframer;
        assert!(wait_until(|| deframer.queued() == 1));
    }
    let activity = topology.tick();
    assert_eq!(activity.rejected, 1);
    assert_eq!(
        read_frame(&mut link),
        response_event(0xFF, CommandStatus::InvalidOpcode).to_vec()
    );

    topology.teardown(&state).unwrap();
}

#[test]
fn test_remote_opcode_forwarded_to_hub() {
    let ground = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = ground.local_addr().unwrap().port();

    let mut topology = Topology::new(test_config());
    let state = TopologyState::new("127.0.0.1", port);
    topology.setup(&state).unwrap();

    let hub_addr = topology.components().hub_com_driver.local_addr().unwrap();
    let mut hub_peer = TcpStream::connect(hub_addr).unwrap();
    {
        let hub = &topology.components().hub_com_driver;
        assert!(wait_until(|| hub.stats().connections() == 1));
    }

    let (mut link, _) = ground.accept().unwrap();
    let mut command = 0x0001_0002u32.to_be_bytes().to_vec();
    command.extend_from_slice(b"args");
    link.write_all(&frame(&command)).unwrap();
    {
        let deframer = &topology.components().deframer;
        assert!(wait_until(|| deframer.queued() == 1));
    }

    let activity = topology.tick();
    assert_eq!(activity.forwarded, 1);
    assert_eq!(activity.executed, 0);
    assert_eq!(read_frame(&mut hub_peer), command);
    assert_eq!(topology.components().cmd_splitter.routed(), (0, 1));

    drop(hub_peer);
    topology.teardown(&state).unwrap();
}
