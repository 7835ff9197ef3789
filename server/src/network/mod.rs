//! UDP session layer.
//!
//! The socket is the only asynchronous boundary: datagrams received here
//! are applied to the world synchronously at the top of each tick, in
//! receipt order per connection, and snapshots flow back out once per tick.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use tokio::net::UdpSocket;

use delve_shared::{ClientMessage, ClassId, SaveData, ServerMessage, PROTOCOL_VERSION};

use crate::entities::ServerPlayer;
use crate::world::{now_unix, GameWorld, Outgoing};

/// Receive buffer; snapshots are full-state and can run large
const MAX_PACKET_SIZE: usize = 65_507;

/// Seconds of silence before a connection is considered dropped
const CONNECTION_TIMEOUT_SECS: f32 = 10.0;

/// Seconds a detached player stays in the run awaiting a reconnect
const RECONNECT_GRACE_SECS: f32 = 60.0;

/// One attached client session
#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub player_id: u64,
    pub run_id: u64,
    pub last_seen: Instant,
    /// Outgoing event queue, flushed every tick
    pub outgoing_queue: Vec<ServerMessage>,
}

impl ClientConnection {
    fn new(addr: SocketAddr, player_id: u64, run_id: u64) -> Self {
        Self {
            addr,
            player_id,
            run_id,
            last_seen: Instant::now(),
            outgoing_queue: Vec::new(),
        }
    }

    fn is_timed_out(&self) -> bool {
        self.last_seen.elapsed().as_secs_f32() > CONNECTION_TIMEOUT_SECS
    }
}

/// Game server socket + session bookkeeping
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: HashMap<SocketAddr, ClientConnection>,
    /// (run_id, player_id) -> when the session detached
    detached: HashMap<(u64, u64), Instant>,
    next_player_id: u64,
}

impl Server {
    /// Bind the server socket
    pub async fn new(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr).await?;
        info!("listening on {}", addr);
        Ok(Self {
            socket: Arc::new(socket),
            clients: HashMap::new(),
            detached: HashMap::new(),
            next_player_id: 1,
        })
    }

    /// Drain and apply everything the socket received since last tick.
    pub async fn process_incoming(&mut self, world: &mut GameWorld) {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, addr)) => {
                    self.handle_packet(&buf[..len], addr, world).await;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("error receiving packet: {}", e);
                    break;
                }
            }
        }

        self.check_timeouts(world);
        self.purge_detached(world);
    }

    async fn handle_packet(&mut self, data: &[u8], addr: SocketAddr, world: &mut GameWorld) {
        let message = match ClientMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed datagrams never take a session down
                warn!("failed to deserialize packet from {}: {}", addr, e);
                return;
            }
        };

        if let Some(client) = self.clients.get_mut(&addr) {
            client.last_seen = Instant::now();
        }

        match message {
            ClientMessage::CreateRun {
                protocol_version,
                player_name,
                class,
            } => {
                self.handle_create_run(addr, protocol_version, player_name, class, world)
                    .await;
            }
            ClientMessage::ResumeRun {
                protocol_version,
                save,
            } => {
                self.handle_resume_run(addr, protocol_version, save, world).await;
            }
            ClientMessage::JoinRun {
                protocol_version,
                run_id,
                player_name,
                class,
            } => {
                self.handle_join_run(addr, protocol_version, run_id, player_name, class, world)
                    .await;
            }
            ClientMessage::Reconnect { run_id, player_id } => {
                self.handle_reconnect(addr, run_id, player_id, world).await;
            }
            ClientMessage::Heartbeat { nonce } => {
                if let Some(client) = self.clients.get_mut(&addr) {
                    client
                        .outgoing_queue
                        .push(ServerMessage::HeartbeatPong { nonce });
                }
            }
            ClientMessage::Disconnect => {
                self.handle_disconnect(addr, world);
            }
            // Everything else is a gameplay intent for the world
            other => {
                let (run_id, player_id) = match self.clients.get(&addr) {
                    Some(c) => (c.run_id, c.player_id),
                    None => return,
                };
                if let Some(run) = world.run_mut(run_id) {
                    let out = run.apply_intent(player_id, other, &mut rand::thread_rng());
                    self.route(run_id, out);
                }
            }
        }
    }

    // =========================================================================
    // Session establishment
    // =========================================================================

    fn protocol_mismatch(version: u32) -> Option<String> {
        if version != PROTOCOL_VERSION {
            Some(format!(
                "protocol version mismatch. server: {}, client: {}",
                PROTOCOL_VERSION, version
            ))
        } else {
            None
        }
    }

    async fn handle_create_run(
        &mut self,
        addr: SocketAddr,
        protocol_version: u32,
        player_name: String,
        class: ClassId,
        world: &mut GameWorld,
    ) {
        if let Some(reason) = Self::protocol_mismatch(protocol_version) {
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }
        if player_name.is_empty() || player_name.len() > 32 {
            let reason = "player name must be 1-32 characters".to_string();
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }
        if self.clients.contains_key(&addr) {
            let reason = "already in a run".to_string();
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        let player = ServerPlayer::new_character(player_id, player_name.clone(), class);
        let run_id = world.create_run(player, &mut rand::thread_rng());

        self.clients
            .insert(addr, ClientConnection::new(addr, player_id, run_id));
        info!(
            "'{}' ({}) created run {} from {}",
            player_name,
            class.name(),
            run_id,
            addr
        );

        let snapshot = world.run(run_id).expect("just created").snapshot();
        self.send_to(
            addr,
            &ServerMessage::RunCreated {
                run_id,
                player_id,
                snapshot,
            },
        )
        .await;
    }

    async fn handle_resume_run(
        &mut self,
        addr: SocketAddr,
        protocol_version: u32,
        save: SaveData,
        world: &mut GameWorld,
    ) {
        if let Some(reason) = Self::protocol_mismatch(protocol_version) {
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }
        // An unreadable or exhausted record never crashes the session;
        // the client is told and stays in character selection
        if !save.is_current_version() {
            let reason = format!("unsupported save version {}", save.version);
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }
        if save.lives == 0 {
            let reason = "character has no lives left".to_string();
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }
        if self.clients.contains_key(&addr) {
            let reason = "already in a run".to_string();
            self.send_to(addr, &ServerMessage::CreateRunFailed { reason }).await;
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        let name = save.player_name.clone();
        let player = ServerPlayer::from_save(player_id, save);
        let run_id = world.create_run(player, &mut rand::thread_rng());

        self.clients
            .insert(addr, ClientConnection::new(addr, player_id, run_id));
        info!("'{}' resumed into run {} from {}", name, run_id, addr);

        let snapshot = world.run(run_id).expect("just created").snapshot();
        self.send_to(
            addr,
            &ServerMessage::RunCreated {
                run_id,
                player_id,
                snapshot,
            },
        )
        .await;
    }

    async fn handle_join_run(
        &mut self,
        addr: SocketAddr,
        protocol_version: u32,
        run_id: u64,
        player_name: String,
        class: ClassId,
        world: &mut GameWorld,
    ) {
        if let Some(reason) = Self::protocol_mismatch(protocol_version) {
            self.send_to(addr, &ServerMessage::JoinFailed { reason }).await;
            return;
        }
        if self.clients.contains_key(&addr) {
            let reason = "already in a run".to_string();
            self.send_to(addr, &ServerMessage::JoinFailed { reason }).await;
            return;
        }
        let joinable = world.run(run_id).map(|r| !r.ended).unwrap_or(false);
        if !joinable {
            let reason = "no such run".to_string();
            self.send_to(addr, &ServerMessage::JoinFailed { reason }).await;
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        let player = ServerPlayer::new_character(player_id, player_name.clone(), class);

        let run = world.run_mut(run_id).expect("checked above");
        run.add_player(player);
        let snapshot = run.snapshot();

        self.route(
            run_id,
            vec![Outgoing::Broadcast(ServerMessage::PlayerJoined {
                player_id,
                name: player_name.clone(),
                class,
            })],
        );
        self.clients
            .insert(addr, ClientConnection::new(addr, player_id, run_id));
        info!("'{}' joined run {} from {}", player_name, run_id, addr);

        self.send_to(
            addr,
            &ServerMessage::RunJoined {
                run_id,
                player_id,
                snapshot,
            },
        )
        .await;
    }

    async fn handle_reconnect(
        &mut self,
        addr: SocketAddr,
        run_id: u64,
        player_id: u64,
        world: &mut GameWorld,
    ) {
        let valid = world
            .run(run_id)
            .map(|r| !r.ended && r.players.contains_key(&player_id))
            .unwrap_or(false);
        if !valid {
            let reason = "unknown run or player".to_string();
            self.send_to(addr, &ServerMessage::JoinFailed { reason }).await;
            return;
        }

        // A stale connection for the same player loses to the new address
        let old_addr: Option<SocketAddr> = self
            .clients
            .iter()
            .find(|(_, c)| c.run_id == run_id && c.player_id == player_id)
            .map(|(a, _)| *a);
        if let Some(old) = old_addr {
            self.clients.remove(&old);
        }
        self.detached.remove(&(run_id, player_id));

        if let Some(run) = world.run_mut(run_id) {
            if let Some(player) = run.players.get_mut(&player_id) {
                player.connected = true;
            }
        }

        self.clients
            .insert(addr, ClientConnection::new(addr, player_id, run_id));
        info!("player {} reconnected to run {} from {}", player_id, run_id, addr);

        let snapshot = world.run(run_id).expect("checked above").snapshot();
        self.send_to(
            addr,
            &ServerMessage::RunJoined {
                run_id,
                player_id,
                snapshot,
            },
        )
        .await;
    }

    fn handle_disconnect(&mut self, addr: SocketAddr, world: &mut GameWorld) {
        let connection = match self.clients.remove(&addr) {
            Some(c) => c,
            None => return,
        };
        let run_empty = {
            let run = match world.run_mut(connection.run_id) {
                Some(r) => r,
                None => return,
            };
            // Hand the client a final save before the player leaves
            if let Some(player) = run.players.get(&connection.player_id) {
                let save = player.to_save(now_unix());
                connection_queue_direct(&self.socket, connection.addr, ServerMessage::SavePoint { save });
            }
            run.remove_player(connection.player_id);
            run.players.is_empty()
        };

        info!("player {} disconnected from run {}", connection.player_id, connection.run_id);
        self.route(
            connection.run_id,
            vec![Outgoing::Broadcast(ServerMessage::PlayerLeft {
                player_id: connection.player_id,
            })],
        );
        if run_empty {
            world.remove_run(connection.run_id);
            info!("run {} closed (empty)", connection.run_id);
        }
    }

    // =========================================================================
    // Timeouts and detach bookkeeping
    // =========================================================================

    /// Silent connections detach: the player stays in the run for the
    /// reconnect grace window.
    fn check_timeouts(&mut self, world: &mut GameWorld) {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|c| c.is_timed_out())
            .map(|c| c.addr)
            .collect();

        for addr in timed_out {
            if let Some(connection) = self.clients.remove(&addr) {
                warn!(
                    "player {} timed out; holding seat in run {} for reconnect",
                    connection.player_id, connection.run_id
                );
                if let Some(run) = world.run_mut(connection.run_id) {
                    if let Some(player) = run.players.get_mut(&connection.player_id) {
                        player.connected = false;
                    }
                }
                self.detached
                    .insert((connection.run_id, connection.player_id), Instant::now());
            }
        }
    }

    /// Detached players whose grace expired leave the run for good.
    fn purge_detached(&mut self, world: &mut GameWorld) {
        let expired: Vec<(u64, u64)> = self
            .detached
            .iter()
            .filter(|(_, since)| since.elapsed().as_secs_f32() > RECONNECT_GRACE_SECS)
            .map(|(key, _)| *key)
            .collect();

        for (run_id, player_id) in expired {
            self.detached.remove(&(run_id, player_id));
            let run_empty = match world.run_mut(run_id) {
                Some(run) => {
                    run.remove_player(player_id);
                    run.players.is_empty()
                }
                None => continue,
            };
            info!("player {} grace expired, removed from run {}", player_id, run_id);
            self.route(
                run_id,
                vec![Outgoing::Broadcast(ServerMessage::PlayerLeft { player_id })],
            );
            if run_empty {
                world.remove_run(run_id);
                info!("run {} closed (abandoned)", run_id);
            }
        }
    }

    // =========================================================================
    // Outgoing traffic
    // =========================================================================

    /// Queue world output onto the right connections
    pub fn route(&mut self, run_id: u64, messages: Vec<Outgoing>) {
        for outgoing in messages {
            match outgoing {
                Outgoing::Broadcast(msg) => {
                    for client in self.clients.values_mut() {
                        if client.run_id == run_id {
                            client.outgoing_queue.push(msg.clone());
                        }
                    }
                }
                Outgoing::To(player_id, msg) => {
                    for client in self.clients.values_mut() {
                        if client.run_id == run_id && client.player_id == player_id {
                            client.outgoing_queue.push(msg);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Serialize each run's snapshot once and send it to every attached
    /// client of that run. Called once per tick.
    pub async fn broadcast_snapshots(&mut self, world: &GameWorld) {
        let mut payloads: HashMap<u64, Vec<u8>> = HashMap::new();
        for (run_id, run) in &world.runs {
            payloads.insert(*run_id, ServerMessage::Snapshot(run.snapshot()).serialize());
        }

        for client in self.clients.values() {
            if let Some(data) = payloads.get(&client.run_id) {
                if let Err(e) = self.socket.send_to(data, client.addr).await {
                    warn!("failed to send snapshot to {}: {}", client.addr, e);
                }
            }
        }
    }

    /// Flush queued per-client events
    pub async fn process_outgoing(&mut self) {
        for client in self.clients.values_mut() {
            for msg in client.outgoing_queue.drain(..) {
                let data = msg.serialize();
                if let Err(e) = self.socket.send_to(&data, client.addr).await {
                    warn!("failed to send to {}: {}", client.addr, e);
                }
            }
        }
    }

    /// Drop sessions whose run ended or whose player no longer exists,
    /// and reap finished runs. Runs after the queues have flushed.
    pub fn cleanup(&mut self, world: &mut GameWorld) {
        let ended: Vec<u64> = world
            .runs
            .iter()
            .filter(|(_, run)| run.ended)
            .map(|(id, _)| *id)
            .collect();
        for run_id in &ended {
            world.remove_run(*run_id);
            info!("run {} finished", run_id);
        }

        self.clients.retain(|_, c| {
            world
                .run(c.run_id)
                .map(|r| r.players.contains_key(&c.player_id))
                .unwrap_or(false)
        });
        self.detached
            .retain(|(run_id, player_id), _| {
                world
                    .run(*run_id)
                    .map(|r| r.players.contains_key(player_id))
                    .unwrap_or(false)
            });
    }

    async fn send_to(&self, addr: SocketAddr, msg: &ServerMessage) {
        let data = msg.serialize();
        if let Err(e) = self.socket.send_to(&data, addr).await {
            warn!("failed to send to {}: {}", addr, e);
        }
    }
}

/// Fire-and-forget direct send used where `&mut self` is unavailable
fn connection_queue_direct(socket: &Arc<UdpSocket>, addr: SocketAddr, msg: ServerMessage) {
    let socket = Arc::clone(socket);
    let data = msg.serialize();
    tokio::spawn(async move {
        if let Err(e) = socket.send_to(&data, addr).await {
            warn!("failed to send to {}: {}", addr, e);
        }
    });
}
