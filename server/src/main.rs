//! Delve game server.
//!
//! Single-writer simulation: the tick loop below is the only place world
//! state changes, at a fixed rate, with the socket as the one async edge.

use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};

use delve_server::config::Config;
use delve_server::network::Server;
use delve_server::world::GameWorld;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let tick_rate = config.tick_rate_checked();

    info!("starting delve server");
    info!("tick rate: {} Hz", tick_rate);

    let mut world = GameWorld::new();
    let mut server = match Server::new(config.port).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start server: {}", e);
            return;
        }
    };

    let tick_duration = Duration::from_secs_f64(1.0 / tick_rate as f64);
    let mut last_tick = Instant::now();

    info!("server started");

    loop {
        let tick_start = Instant::now();

        // Stage 1: apply intents received since the last tick
        server.process_incoming(&mut world).await;

        // Stages 2-5: advance every run
        let delta = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();
        let mut rng = rand::thread_rng();
        for (run_id, messages) in world.tick(delta, &mut rng) {
            server.route(run_id, messages);
        }

        // Stage 6: snapshots, then the discrete event queues
        server.broadcast_snapshots(&world).await;
        server.process_outgoing().await;

        server.cleanup(&mut world);

        // Hold the fixed rate
        let elapsed = tick_start.elapsed();
        if elapsed < tick_duration {
            tokio::time::sleep(tick_duration - elapsed).await;
        }
    }
}
