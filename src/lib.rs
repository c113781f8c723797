#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod catalog;
pub mod db;
pub mod env;
pub mod error;
pub mod models;
pub mod progress;
pub mod sync;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
mod test;

use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use tracing::info;

use api::{
    api_add_progress, api_add_wishlist, api_get_machine, api_get_machines, api_get_progress,
    api_get_roadmap, api_get_wishlist, api_login, api_logout, api_me, api_me_unauthorized,
    api_profile, api_register, api_remove_progress, api_remove_wishlist, api_roadmap_progress,
    api_skill_tree, health,
};
use auth::unauthorized_api;
use telemetry::TelemetryFairing;

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting lab tracker");

    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_register,
                api_me,
                api_me_unauthorized,
                api_get_machines,
                api_get_machine,
                api_get_roadmap,
                api_roadmap_progress,
                api_profile,
                api_get_progress,
                api_add_progress,
                api_remove_progress,
                api_get_wishlist,
                api_add_wishlist,
                api_remove_wishlist,
                api_skill_tree,
                health,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .attach(TelemetryFairing)
}
