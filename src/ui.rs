use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use fltk::{
    app,
    button::Button,
    enums::{Color, FrameType},
    frame::Frame,
    group::Flex,
    menu::Choice,
    prelude::*,
    window::Window,
};
use log::warn;

use crate::config::AppConfig;
use crate::controller::VolumeController;

const BG_COLOR: Color = Color::from_rgb(1, 1, 1);
const WIDGET_BG: Color = Color::from_rgb(40, 40, 40);
const TEXT_COLOR: Color = Color::White;

/// Poll cadence for the serial drain; the drain itself is bounded by the
/// port timeout so the loop stays responsive.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SCROLL_DECAY: Duration = Duration::from_secs(1);

/// Index of the knob the dropdown rebinds.
const REBIND_KNOB: usize = 2;

fn style_widget<W: WidgetExt>(w: &mut W) {
    w.set_color(WIDGET_BG);
    w.set_label_color(TEXT_COLOR);
    w.set_frame(FrameType::FlatBox);
}

fn style_choice(w: &mut Choice) {
    w.set_color(WIDGET_BG);
    w.set_text_color(TEXT_COLOR);
    w.set_frame(FrameType::FlatBox);
    w.set_selection_color(Color::from_rgb(80, 80, 80));
}

fn populate_sessions(choice: &mut Choice, sessions: &[String], selected: &str) {
    choice.clear();
    for s in sessions {
        choice.add_choice(s);
    }
    if let Some(idx) = sessions.iter().position(|s| s.eq_ignore_ascii_case(selected)) {
        choice.set_value(idx as i32);
    }
}

pub fn run(controller: Arc<VolumeController>, config: AppConfig, config_path: PathBuf) -> Result<()> {
    let app = app::App::default();
    let (bg_r, bg_g, bg_b) = BG_COLOR.to_rgb();
    app::set_background_color(bg_r, bg_g, bg_b);
    let (fg_r, fg_g, fg_b) = TEXT_COLOR.to_rgb();
    app::set_foreground_color(fg_r, fg_g, fg_b);
    app::set_font_size(14);

    let mut win = Window::default().with_size(350, 300).with_label("Volume Module");
    win.set_color(BG_COLOR);

    let mut col = Flex::default().column().with_size(350, 300).center_of_parent();
    col.set_margin(15);
    col.set_pad(10);

    let names = controller.app_names();
    let mut knob_labels = Vec::new();
    for name in names.iter().take(REBIND_KNOB) {
        let mut label = Frame::default().with_label(&format!("{name}: --"));
        label.set_label_color(TEXT_COLOR);
        knob_labels.push(label);
    }

    let mut row_rebind = Flex::default().row();
    let mut label3 = Frame::default().with_label(&format!("{}: --", names[REBIND_KNOB]));
    label3.set_label_color(TEXT_COLOR);
    let mut choice_app = Choice::default();
    style_choice(&mut choice_app);
    let mut btn_rescan = Button::default().with_label("@refresh");
    style_widget(&mut btn_rescan);
    row_rebind.end();
    let _ = row_rebind.fixed(&btn_rescan, 30);
    knob_labels.push(label3);

    let mut scroll_label = Frame::default().with_label("Click: False");
    scroll_label.set_label_color(TEXT_COLOR);

    let mut btn_close = Button::default().with_label("Close");
    style_widget(&mut btn_close);

    col.end();
    for label in &knob_labels[..REBIND_KNOB] {
        let _ = col.fixed(label, 30);
    }
    let _ = col.fixed(&row_rebind, 30);
    let _ = col.fixed(&scroll_label, 30);
    let _ = col.fixed(&btn_close, 40);

    win.end();
    win.show();

    populate_sessions(
        &mut choice_app,
        &controller.get_all_audio_sessions(),
        &config.knob3_app,
    );

    let state = Arc::new(Mutex::new(config));

    {
        let controller = Arc::clone(&controller);
        let mut choice_app = choice_app.clone();
        let state = Arc::clone(&state);
        btn_rescan.set_callback(move |_| {
            let selected = state.lock().unwrap().knob3_app.clone();
            populate_sessions(&mut choice_app, &controller.get_all_audio_sessions(), &selected);
        });
    }

    {
        let controller = Arc::clone(&controller);
        let state = Arc::clone(&state);
        let path = config_path.clone();
        choice_app.set_callback(move |c| {
            let Some(app) = c.choice() else { return };
            controller.set_app(REBIND_KNOB, &app);
            let mut cfg = state.lock().unwrap();
            cfg.knob3_app = app;
            if let Err(e) = cfg.save(&path) {
                warn!("could not save config: {e}");
            }
        });
    }

    {
        let mut win = win.clone();
        btn_close.set_callback(move |_| win.hide());
    }

    let mut last_poll = Instant::now() - POLL_INTERVAL;
    let mut scroll_since: Option<Instant> = None;
    while win.shown() {
        app::check();
        if last_poll.elapsed() >= POLL_INTERVAL {
            last_poll = Instant::now();
            let tick = controller.read_serial();
            if !tick.active {
                break;
            }
            let names = controller.app_names();
            for (i, label) in knob_labels.iter_mut().enumerate() {
                if tick.changed[i] && tick.volumes[i] >= 0 {
                    label.set_label(&format!("{}: {}%", names[i], tick.volumes[i]));
                }
            }
            if tick.scroll {
                scroll_label.set_label("Click: True");
                scroll_since = Some(Instant::now());
            } else if scroll_since.is_some_and(|at| at.elapsed() >= SCROLL_DECAY) {
                scroll_label.set_label("Click: False");
                scroll_since = None;
            }
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    controller.close();
    app.quit();
    Ok(())
}
