//! UDP network client.
//!
//! A non-blocking client polled from the renderer's frame loop. Drop
//! detection is heartbeat-based; reconnection retries on a linearly
//! growing delay up to a fixed attempt cap, then surfaces `GivenUp`.
//! The retry schedule lives in plain state driven by `poll`, so dropping
//! the client (or calling `disconnect`) cancels any pending attempt
//! deterministically.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{info, warn};

use delve_shared::{
    ClassId, ClientMessage, SaveData, ServerMessage, DEFAULT_PORT, PROTOCOL_VERSION,
    RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_ATTEMPTS,
};

/// Receive buffer; snapshots are full-state and can run large
const MAX_PACKET_SIZE: usize = 65_507;

/// Transport tuning knobs; tests shrink these to keep wall time down
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub heartbeat_interval: Duration,
    /// Silence longer than this while connected counts as a drop
    pub liveness_timeout: Duration,
    /// How long one connect/reconnect attempt may wait for an answer
    pub connect_timeout: Duration,
    /// Reconnect delay grows linearly: `base_delay * attempt`
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// Connection state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the server to acknowledge a create/resume/join/reconnect.
    /// `reconnect_attempt` is set when this leg belongs to a reconnect.
    Connecting,
    Connected,
    /// Waiting out the backoff delay before the next reconnect attempt
    Reconnecting { attempt: u32 },
    /// The attempt cap was exceeded; no further retries happen
    GivenUp,
}

/// Network client for communicating with the game server
pub struct NetworkClient {
    config: ClientConfig,
    socket: Option<UdpSocket>,
    server_addr: Option<SocketAddr>,
    state: ConnectionState,
    /// Set while Connecting on a reconnect leg
    connecting_reconnect_attempt: Option<u32>,
    connect_started: Option<Instant>,
    /// When the next reconnect attempt fires (while Reconnecting)
    next_attempt_at: Option<Instant>,
    run_id: Option<u64>,
    player_id: Option<u64>,
    last_received: Instant,
    last_heartbeat: Instant,
    heartbeat_nonce: u32,
    incoming: Vec<ServerMessage>,
}

impl NetworkClient {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            socket: None,
            server_addr: None,
            state: ConnectionState::Disconnected,
            connecting_reconnect_attempt: None,
            connect_started: None,
            next_attempt_at: None,
            run_id: None,
            player_id: None,
            last_received: Instant::now(),
            last_heartbeat: Instant::now(),
            heartbeat_nonce: 0,
            incoming: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    pub fn run_id(&self) -> Option<u64> {
        self.run_id
    }

    pub fn player_id(&self) -> Option<u64> {
        self.player_id
    }

    fn init_socket(&mut self, server_addr: &str) -> Result<(), String> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("failed to create socket: {}", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| format!("failed to set non-blocking: {}", e))?;

        let addr: SocketAddr = if server_addr.contains(':') {
            server_addr
                .parse()
                .map_err(|e| format!("invalid server address: {}", e))?
        } else {
            format!("{}:{}", server_addr, DEFAULT_PORT)
                .parse()
                .map_err(|e| format!("invalid server address: {}", e))?
        };

        self.socket = Some(socket);
        self.server_addr = Some(addr);
        Ok(())
    }

    fn begin_connecting(&mut self, reconnect_attempt: Option<u32>) {
        self.state = ConnectionState::Connecting;
        self.connecting_reconnect_attempt = reconnect_attempt;
        self.connect_started = Some(Instant::now());
        self.next_attempt_at = None;
        self.last_received = Instant::now();
    }

    /// Start a fresh run
    pub fn create_run(
        &mut self,
        server_addr: &str,
        player_name: &str,
        class: ClassId,
    ) -> Result<(), String> {
        self.init_socket(server_addr)?;
        self.begin_connecting(None);
        self.send_message(&ClientMessage::CreateRun {
            protocol_version: PROTOCOL_VERSION,
            player_name: player_name.to_string(),
            class,
        })
    }

    /// Resume a run from a save record
    pub fn resume_run(&mut self, server_addr: &str, save: SaveData) -> Result<(), String> {
        self.init_socket(server_addr)?;
        self.begin_connecting(None);
        self.send_message(&ClientMessage::ResumeRun {
            protocol_version: PROTOCOL_VERSION,
            save,
        })
    }

    /// Join another player's run
    pub fn join_run(
        &mut self,
        server_addr: &str,
        run_id: u64,
        player_name: &str,
        class: ClassId,
    ) -> Result<(), String> {
        self.init_socket(server_addr)?;
        self.begin_connecting(None);
        self.send_message(&ClientMessage::JoinRun {
            protocol_version: PROTOCOL_VERSION,
            run_id,
            player_name: player_name.to_string(),
            class,
        })
    }

    /// Disconnect gracefully and reset all session state, including any
    /// scheduled reconnect attempt.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            let _ = self.send_message(&ClientMessage::Disconnect);
        }
        self.socket = None;
        self.server_addr = None;
        self.state = ConnectionState::Disconnected;
        self.connecting_reconnect_attempt = None;
        self.connect_started = None;
        self.next_attempt_at = None;
        self.run_id = None;
        self.player_id = None;
        self.incoming.clear();
    }

    /// Poll the transport: receive messages, drive heartbeats, detect
    /// drops and fire due reconnect attempts. Call every frame.
    pub fn poll(&mut self) -> Vec<ServerMessage> {
        self.receive_packets();
        self.drive_state_machine();
        std::mem::take(&mut self.incoming)
    }

    fn drive_state_machine(&mut self) {
        let now = Instant::now();
        match self.state.clone() {
            ConnectionState::Connected => {
                if now.duration_since(self.last_received) > self.config.liveness_timeout {
                    warn!("server silent for {:?}, reconnecting", self.config.liveness_timeout);
                    self.schedule_reconnect(1);
                } else if now.duration_since(self.last_heartbeat) > self.config.heartbeat_interval {
                    self.heartbeat_nonce = self.heartbeat_nonce.wrapping_add(1);
                    let nonce = self.heartbeat_nonce;
                    let _ = self.send_message(&ClientMessage::Heartbeat { nonce });
                    self.last_heartbeat = now;
                }
            }
            ConnectionState::Connecting => {
                if now.duration_since(self.connect_started.unwrap_or(now))
                    > self.config.connect_timeout
                {
                    match self.connecting_reconnect_attempt {
                        Some(attempt) => self.schedule_reconnect(attempt + 1),
                        None => {
                            warn!("connection attempt timed out");
                            self.state = ConnectionState::Disconnected;
                        }
                    }
                }
            }
            ConnectionState::Reconnecting { attempt } => {
                let due = self.next_attempt_at.map(|at| now >= at).unwrap_or(true);
                if due {
                    self.fire_reconnect(attempt);
                }
            }
            ConnectionState::Disconnected | ConnectionState::GivenUp => {}
        }
    }

    /// Enter `Reconnecting` for the given attempt number, or `GivenUp`
    /// once the cap is exceeded.
    fn schedule_reconnect(&mut self, attempt: u32) {
        if self.run_id.is_none() || self.player_id.is_none() {
            self.state = ConnectionState::Disconnected;
            return;
        }
        if attempt > self.config.max_attempts {
            warn!(
                "giving up after {} reconnect attempts",
                self.config.max_attempts
            );
            self.state = ConnectionState::GivenUp;
            self.next_attempt_at = None;
            return;
        }
        let delay = self.config.base_delay * attempt;
        self.state = ConnectionState::Reconnecting { attempt };
        self.next_attempt_at = Some(Instant::now() + delay);
    }

    fn fire_reconnect(&mut self, attempt: u32) {
        let (run_id, player_id) = match (self.run_id, self.player_id) {
            (Some(r), Some(p)) => (r, p),
            _ => {
                self.state = ConnectionState::Disconnected;
                return;
            }
        };
        info!("reconnect attempt {} for run {}", attempt, run_id);
        self.begin_connecting(Some(attempt));
        let _ = self.send_message(&ClientMessage::Reconnect { run_id, player_id });
    }

    fn receive_packets(&mut self) {
        let socket = match &self.socket {
            Some(s) => s,
            None => return,
        };

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut packets: Vec<Vec<u8>> = Vec::new();
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, _addr)) => packets.push(buf[..len].to_vec()),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("network receive error: {}", e);
                    break;
                }
            }
        }

        for packet in packets {
            self.process_packet(&packet);
        }
    }

    fn process_packet(&mut self, data: &[u8]) {
        let message = match ServerMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("failed to deserialize server message: {}", e);
                return;
            }
        };

        self.last_received = Instant::now();

        match &message {
            ServerMessage::RunCreated { run_id, player_id, .. }
            | ServerMessage::RunJoined { run_id, player_id, .. } => {
                self.run_id = Some(*run_id);
                self.player_id = Some(*player_id);
                self.state = ConnectionState::Connected;
                self.connecting_reconnect_attempt = None;
                self.next_attempt_at = None;
                info!("session established: run {}, player {}", run_id, player_id);
            }
            ServerMessage::CreateRunFailed { reason } => {
                warn!("run creation failed: {}", reason);
                self.state = ConnectionState::Disconnected;
            }
            ServerMessage::JoinFailed { reason } => {
                warn!("join failed: {}", reason);
                // A rejected reconnect is permanent (the seat is gone)
                if self.connecting_reconnect_attempt.is_some() {
                    self.state = ConnectionState::GivenUp;
                } else {
                    self.state = ConnectionState::Disconnected;
                }
                self.connecting_reconnect_attempt = None;
            }
            _ => {}
        }

        self.incoming.push(message);
    }

    /// Send an intent to the server
    pub fn send_message(&mut self, msg: &ClientMessage) -> Result<(), String> {
        let socket = self.socket.as_ref().ok_or("not connected")?;
        let server_addr = self.server_addr.ok_or("no server address")?;
        let data = msg.serialize();
        socket
            .send_to(&data, server_addr)
            .map_err(|e| format!("failed to send: {}", e))?;
        Ok(())
    }

    // =========================================================================
    // Intent helpers
    // =========================================================================

    pub fn send_input(&mut self, movement: [f32; 2]) {
        let _ = self.send_message(&ClientMessage::Input { movement });
    }

    pub fn send_set_target(&mut self, target: Option<u64>) {
        let _ = self.send_message(&ClientMessage::SetTarget { target });
    }

    pub fn send_cast_ability(&mut self, ability_id: u32, target: Option<u64>) {
        let _ = self.send_message(&ClientMessage::CastAbility { ability_id, target });
    }

    pub fn send_advance_floor(&mut self) {
        let _ = self.send_message(&ClientMessage::AdvanceFloor);
    }

    pub fn send_use_item(&mut self, slot: u8) {
        let _ = self.send_message(&ClientMessage::UseItem { slot });
    }

    pub fn send_equip_from_backpack(&mut self, slot: u8) {
        let _ = self.send_message(&ClientMessage::EquipFromBackpack { slot });
    }

    pub fn send_unequip_item(&mut self, slot: delve_shared::EquipSlot) {
        let _ = self.send_message(&ClientMessage::UnequipItem { slot });
    }

    pub fn send_open_chest(&mut self, chest_id: u64) {
        let _ = self.send_message(&ClientMessage::OpenChest { chest_id });
    }

    pub fn send_interact_vendor(&mut self, vendor_id: u64) {
        let _ = self.send_message(&ClientMessage::InteractVendor { vendor_id });
    }

    pub fn send_purchase(&mut self, vendor_id: u64, service: delve_shared::VendorService) {
        let _ = self.send_message(&ClientMessage::PurchaseService { vendor_id, service });
    }

    pub fn send_pickup(&mut self, entity_id: u64) {
        let _ = self.send_message(&ClientMessage::PickupItem { entity_id });
    }

    pub fn send_save_request(&mut self) {
        let _ = self.send_message(&ClientMessage::RequestSave);
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::new()
    }
}
