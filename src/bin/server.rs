//! Thin launcher: wires environment-driven logging, then starts the server
//! built by `collabkit::rocket()`. All the actual wiring (config, auth,
//! storage, fairings) lives in the library; this binary exists only so the
//! crate is runnable, per the teacher's `rocket()`-builder-in-lib.rs shape.

use anyhow::Context;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    collabkit::log_startup_banner();
    collabkit::rocket().launch().await.context("server exited with an error")?;
    Ok(())
}
