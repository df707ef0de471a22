//! Startup stage reporting on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Spinner on a terminal, plain lines otherwise.
    #[default]
    Auto,
    Plain,
    Pretty,
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

    /// Decide from the mode and whether stderr is a terminal.
    pub fn for_stderr(mode: UiMode) -> Self {
        Self::new(mode, std::io::stderr().is_terminal())
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Report a stage; completion (or failure) is printed when the guard drops.
    pub fn stage(&self, name: &str) -> Stage {
        if !self.pretty() {
            eprintln!("==> {}", name);
            return Stage::new(name, None);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("{name}…"));
        Stage::new(name, Some(spinner))
    }
}

pub struct Stage {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failure: Option<String>,
}

impl Stage {
    fn new(name: &str, spinner: Option<ProgressBar>) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failure: None,
        }
    }

    /// Mark the stage failed; the reason is printed instead of the check mark.
    pub fn fail(mut self, reason: impl std::fmt::Display) {
        self.failure = Some(reason.to_string());
    }

    fn summary(&self) -> String {
        match &self.failure {
            Some(reason) => format!("✘ {}: {}", self.name, reason),
            None => format!("✔ {} ({})", self.name, format_duration(self.start.elapsed())),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let message = self.summary();
        match &self.spinner {
            Some(spinner) if self.failure.is_some() => spinner.abandon_with_message(message),
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_only_on_tty_unless_plain() {
        assert!(Ui::new(UiMode::Auto, true).pretty());
        assert!(Ui::new(UiMode::Pretty, true).pretty());
        assert!(!Ui::new(UiMode::Plain, true).pretty());
        assert!(!Ui::new(UiMode::Pretty, false).pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn failed_stage_summary() {
        let mut stage = Stage::new("load model", None);
        stage.failure = Some("weights missing".to_string());
        assert_eq!(stage.summary(), "✘ load model: weights missing");
    }
}
