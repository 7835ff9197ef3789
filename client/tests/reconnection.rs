//! Integration tests: the transport state machine against a scripted
//! server on the loopback interface.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use delve_client::{ClientConfig, ConnectionState, NetworkClient};
use delve_shared::{ClassId, ClientMessage, ServerMessage, WorldSnapshot};

fn fast_config() -> ClientConfig {
    ClientConfig {
        heartbeat_interval: Duration::from_millis(20),
        liveness_timeout: Duration::from_millis(60),
        connect_timeout: Duration::from_millis(40),
        base_delay: Duration::from_millis(10),
        max_attempts: 3,
    }
}

fn empty_snapshot(run_id: u64, tick: u64) -> WorldSnapshot {
    WorldSnapshot {
        run_id,
        tick,
        floor: 1,
        rooms: vec![],
        players: vec![],
        enemies: vec![],
        pets: vec![],
        ground_items: vec![],
        traps: vec![],
        chests: vec![],
        vendors: vec![],
        ground_effects: vec![],
    }
}

struct ScriptedServer {
    socket: UdpSocket,
}

impl ScriptedServer {
    fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        Self { socket }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    /// Drain every pending datagram into (message, sender) pairs
    fn drain(&self) -> Vec<(ClientMessage, SocketAddr)> {
        let mut buf = [0u8; 65_507];
        let mut messages = Vec::new();
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if let Ok(msg) = ClientMessage::deserialize(&buf[..len]) {
                        messages.push((msg, from));
                    }
                }
                Err(_) => break,
            }
        }
        messages
    }

    fn send(&self, to: SocketAddr, msg: &ServerMessage) {
        self.socket.send_to(&msg.serialize(), to).unwrap();
    }
}

/// Poll the client until `predicate` holds or the deadline passes,
/// feeding every received client message through `on_message`.
fn pump<F, P>(
    client: &mut NetworkClient,
    server: &ScriptedServer,
    deadline: Duration,
    mut on_message: F,
    mut predicate: P,
) -> bool
where
    F: FnMut(&ScriptedServer, ClientMessage, SocketAddr),
    P: FnMut(&NetworkClient) -> bool,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        for (msg, from) in server.drain() {
            on_message(server, msg, from);
        }
        client.poll();
        if predicate(client) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Establish a session: answer the first CreateRun with RunCreated
fn establish(client: &mut NetworkClient, server: &ScriptedServer, run_id: u64) -> SocketAddr {
    client
        .create_run(&server.addr().to_string(), "hero", ClassId::Warrior)
        .unwrap();

    let mut client_addr = None;
    let connected = pump(
        client,
        server,
        Duration::from_secs(2),
        |server, msg, from| {
            if matches!(msg, ClientMessage::CreateRun { .. }) {
                client_addr = Some(from);
                server.send(
                    from,
                    &ServerMessage::RunCreated {
                        run_id,
                        player_id: 1,
                        snapshot: empty_snapshot(run_id, 1),
                    },
                );
            }
        },
        |c| c.is_connected(),
    );
    assert!(connected, "session must establish");
    client_addr.expect("server saw the create-run intent")
}

#[test]
fn create_run_establishes_a_session() {
    let server = ScriptedServer::bind();
    let mut client = NetworkClient::with_config(fast_config());

    establish(&mut client, &server, 42);
    assert_eq!(client.run_id(), Some(42));
    assert_eq!(client.player_id(), Some(1));
    assert_eq!(*client.state(), ConnectionState::Connected);
}

#[test]
fn heartbeats_flow_while_connected() {
    let server = ScriptedServer::bind();
    let mut client = NetworkClient::with_config(fast_config());
    establish(&mut client, &server, 42);

    let mut heartbeats = 0;
    pump(
        &mut client,
        &server,
        Duration::from_millis(200),
        |server, msg, from| {
            if let ClientMessage::Heartbeat { nonce } = msg {
                heartbeats += 1;
                server.send(from, &ServerMessage::HeartbeatPong { nonce });
            }
        },
        |_| false,
    );
    assert!(heartbeats >= 2, "expected steady heartbeats, saw {}", heartbeats);
    assert_eq!(*client.state(), ConnectionState::Connected);
}

#[test]
fn silent_server_triggers_bounded_reconnects_then_given_up() {
    let server = ScriptedServer::bind();
    let config = fast_config();
    let max_attempts = config.max_attempts;
    let mut client = NetworkClient::with_config(config);
    establish(&mut client, &server, 42);

    // The server stops answering everything from here on
    let mut reconnects = 0;
    let gave_up = pump(
        &mut client,
        &server,
        Duration::from_secs(5),
        |_, msg, _| {
            if matches!(msg, ClientMessage::Reconnect { .. }) {
                reconnects += 1;
            }
        },
        |c| *c.state() == ConnectionState::GivenUp,
    );

    assert!(gave_up, "the state machine must surface GivenUp");
    assert!(
        reconnects <= max_attempts,
        "attempts must never exceed the cap: {} > {}",
        reconnects,
        max_attempts
    );
    assert!(reconnects >= 1, "at least one reconnect must have fired");

    // GivenUp is terminal: no further attempts fire
    let more = pump(
        &mut client,
        &server,
        Duration::from_millis(150),
        |_, msg, _| {
            if matches!(msg, ClientMessage::Reconnect { .. }) {
                reconnects += 1;
            }
        },
        |_| false,
    );
    assert!(!more);
    assert!(reconnects <= max_attempts, "GivenUp must not keep retrying");
}

#[test]
fn reconnect_reattaches_the_same_run() {
    let server = ScriptedServer::bind();
    let mut client = NetworkClient::with_config(fast_config());
    establish(&mut client, &server, 42);

    // Silence until the first Reconnect arrives, then accept it
    let reattached = pump(
        &mut client,
        &server,
        Duration::from_secs(5),
        |server, msg, from| {
            if let ClientMessage::Reconnect { run_id, player_id } = msg {
                server.send(
                    from,
                    &ServerMessage::RunJoined {
                        run_id,
                        player_id,
                        snapshot: empty_snapshot(run_id, 500),
                    },
                );
            }
        },
        |c| c.is_connected(),
    );

    assert!(reattached, "an accepted reconnect returns to Connected");
    assert_eq!(client.run_id(), Some(42));
}

#[test]
fn rejected_reconnect_is_terminal() {
    let server = ScriptedServer::bind();
    let mut client = NetworkClient::with_config(fast_config());
    establish(&mut client, &server, 42);

    let gave_up = pump(
        &mut client,
        &server,
        Duration::from_secs(5),
        |server, msg, from| {
            if matches!(msg, ClientMessage::Reconnect { .. }) {
                server.send(
                    from,
                    &ServerMessage::JoinFailed {
                        reason: "grace expired".into(),
                    },
                );
            }
        },
        |c| *c.state() == ConnectionState::GivenUp,
    );
    assert!(gave_up, "a rejected reconnect seat is gone for good");
}

#[test]
fn disconnect_cancels_any_pending_reconnect() {
    let server = ScriptedServer::bind();
    let mut client = NetworkClient::with_config(fast_config());
    establish(&mut client, &server, 42);

    // Let the drop detector schedule a reconnect, then tear down
    pump(
        &mut client,
        &server,
        Duration::from_millis(150),
        |_, _, _| {},
        |c| matches!(c.state(), ConnectionState::Reconnecting { .. }),
    );
    client.disconnect();
    assert_eq!(*client.state(), ConnectionState::Disconnected);

    // No attempt may fire after teardown
    let mut reconnects = 0;
    pump(
        &mut client,
        &server,
        Duration::from_millis(150),
        |_, msg, _| {
            if matches!(msg, ClientMessage::Reconnect { .. }) {
                reconnects += 1;
            }
        },
        |_| false,
    );
    assert_eq!(reconnects, 0, "teardown must not leak a reconnect attempt");
}
