#![windows_subsystem = "windows"] // comment out for a debug terminal

mod audio;
mod bindings;
mod config;
mod controller;
mod input;
mod serial;
mod ui;

use std::sync::Arc;

use anyhow::Result;

use crate::bindings::ChannelBindings;
use crate::config::{AppConfig, DEFAULT_APPS};
use crate::controller::VolumeController;

fn main() -> Result<()> {
    env_logger::init();

    let path = config::config_path();
    let cfg = AppConfig::load(&path);
    let apps = vec![
        DEFAULT_APPS[0].to_string(),
        DEFAULT_APPS[1].to_string(),
        cfg.knob3_app.clone(),
    ];

    // Session discovery dump, handy when a knob maps to nothing.
    if std::env::args().any(|a| a == "--sessions") {
        let bindings = ChannelBindings::new(apps);
        for name in audio::active_app_names() {
            match bindings.match_channel(&name) {
                Some(knob) => println!("{name}  -> knob {knob}"),
                None => println!("{name}"),
            }
        }
        return Ok(());
    }

    let controller = Arc::new(VolumeController::new(&cfg.serial, apps)?);
    ui::run(controller, cfg, path)
}
