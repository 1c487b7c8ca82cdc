//! Stderr progress for the `sentinel` binary: a spinner per setup phase and a
//! running frame counter on a TTY, plain `==>` lines otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use gate_sentinel::{CommitReceipt, EventCounts};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn phase(&self, name: &str) -> PhaseGuard {
        if self.pretty() {
            let spinner = spinner(name);
            PhaseGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            PhaseGuard::new(name.to_string(), None)
        }
    }

    /// Live counter of committed frames and events for the frame loop.
    pub fn frames(&self, source: &str) -> FrameProgress {
        let spinner = if self.pretty() {
            Some(spinner(&format!("Processing {}", source)))
        } else {
            eprintln!("==> Processing {}", source);
            None
        };
        FrameProgress {
            spinner,
            frames: 0,
            events: EventCounts::default(),
            start: Instant::now(),
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(format!("{message}…"));
    spinner
}

pub struct PhaseGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl PhaseGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        finish(self.spinner.as_ref(), message);
    }
}

pub struct FrameProgress {
    spinner: Option<ProgressBar>,
    frames: u64,
    events: EventCounts,
    start: Instant,
}

impl FrameProgress {
    pub fn record(&mut self, receipt: &CommitReceipt) {
        self.frames += 1;
        self.events.add(&receipt.counts);
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "frame {} · {} bag / {} vehicle / {} face",
                receipt.frame_index,
                self.events.gunny_bag_events,
                self.events.vehicle_logs,
                self.events.face_logs
            ));
        }
    }

    pub fn finish(self) {
        let message = format!(
            "✔ {} frame(s), {} event(s) ({})",
            self.frames,
            self.events.total(),
            format_duration(self.start.elapsed())
        );
        finish(self.spinner.as_ref(), message);
    }
}

fn finish(spinner: Option<&ProgressBar>, message: String) {
    match spinner {
        Some(spinner) => spinner.finish_with_message(message),
        None => eprintln!("{message}"),
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
