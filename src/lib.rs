pub mod auth;
pub mod config;
pub mod crdt;
pub mod errors;
pub mod permissions;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod session;
pub mod storage;
pub mod transport;

use std::env;
use std::sync::Arc;

use rocket_cors::CorsOptions;

use auth::{AuthProvider, NoAuthProvider};
use config::Config;
use presence::PresenceManager;
use room::RoomManager;
use session::Dispatcher;
use storage::{MemoryStorageBackend, StorageBackend};

/// Build the server with every default wired in: `Config::from_env()`,
/// no-op auth, and in-memory storage. Swap either with
/// [`rocket_with_auth_and_storage`] for a production deployment.
pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_auth_and_storage(Arc::new(NoAuthProvider::default()), Some(Arc::new(MemoryStorageBackend::new())))
}

pub fn rocket_with_auth_and_storage(auth: Arc<dyn AuthProvider>, storage: Option<Arc<dyn StorageBackend>>) -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::from_env(), auth, storage)
}

fn build_rocket(config: Config, auth: Arc<dyn AuthProvider>, storage: Option<Arc<dyn StorageBackend>>) -> rocket::Rocket<rocket::Build> {
    let presence = Arc::new(PresenceManager::new(config.presence_stale_timeout_secs, config.presence_cleanup_interval_secs));
    let rooms = Arc::new(RoomManager::new(presence));
    let dispatcher = Arc::new(Dispatcher::new(rooms, auth, storage, config));

    let cors = CorsOptions::default().to_cors().expect("Failed to create CORS");

    let liftoff_dispatcher = dispatcher.clone();
    let shutdown_dispatcher = dispatcher.clone();

    rocket::build()
        .manage(dispatcher)
        .attach(cors)
        .attach(rocket::fairing::AdHoc::on_liftoff("Presence", move |_rocket| {
            Box::pin(async move {
                let presence = liftoff_dispatcher.rooms.presence().clone();

                // Route presence updates back through room broadcast the
                // same way a direct `presence` message does (spec §4.6's
                // "invoke the registered broadcast callback").
                let callback_dispatcher = liftoff_dispatcher.clone();
                presence
                    .set_broadcast_callback(Arc::new(move |room_id: String, user_id: String, data: serde_json::Value| {
                        let dispatcher = callback_dispatcher.clone();
                        tokio::spawn(async move {
                            if let Some(room) = dispatcher.rooms.get_room(&room_id).await {
                                room.broadcast(
                                    protocol::ServerMessage::Presence {
                                        room_id,
                                        user_id: user_id.clone(),
                                        data,
                                    },
                                    Some(&user_id),
                                    None,
                                )
                                .await;
                            }
                        });
                    }))
                    .await;

                presence.start().await;
                log::info!("presence reaper started");
            })
        }))
        .attach(rocket::fairing::AdHoc::on_shutdown("Presence Shutdown", move |_rocket| {
            Box::pin(async move {
                shutdown_dispatcher.rooms.presence().stop().await;
            })
        }))
        .mount("/", rocket::routes![transport::ws_connect])
}

/// Purely informational: Rocket reads `ROCKET_PORT`/`ROCKET_ADDRESS`
/// itself when the server launches, this just echoes the chosen port to
/// the log at startup.
pub fn log_startup_banner() {
    let port = env::var("ROCKET_PORT").unwrap_or_else(|_| "8000".to_string());
    log::info!("collabkit starting on port {port}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_panicking() {
        let _ = rocket();
    }
}
