//! ProgressBar and other functionality to report the progress of the run.

use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use localizer::progress::SlamProgress;

#[derive(Debug, Clone)]
pub struct Progress {
    mp: Arc<MultiProgress>,
}

#[derive(Debug, Clone)]
pub struct StyledSpinner {
    spinner: ProgressBar,
}

#[derive(Debug, Clone)]
pub struct StyledBar {
    pb: ProgressBar,
}

// ===============================================================================================

impl Progress {
    pub fn new() -> Self {
        Self {
            mp: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::stderr())),
        }
    }

    pub fn new_main_spinner(&self) -> StyledSpinner {
        let spinner = self.mp.add(ProgressBar::new_spinner());
        spinner.set_style(Styles::MainSpinner.style());
        StyledSpinner { spinner }
    }

    pub fn new_spinner(&self) -> StyledSpinner {
        let spinner = self.mp.add(ProgressBar::new_spinner());
        spinner.set_style(Styles::Spinner.style());
        StyledSpinner { spinner }
    }

    pub fn new_progress_bar(&self, len: u64) -> StyledBar {
        let pb = self.mp.add(ProgressBar::new(len));
        pb.set_style(Styles::Bar.style());
        StyledBar { pb }
    }

    /// Drives the drawing. Somebody has to call this (from its own
    /// thread), or nothing ever renders.
    pub fn join(&self) {
        self.mp.join().unwrap();
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

// ===============================================================================================

// TODO the two delegating impls below are identical; a small macro would
// collapse them.
impl StyledSpinner {
    pub fn enable_steady_tick(&self, ms: u64) {
        self.spinner.enable_steady_tick(ms);
    }
}

impl SlamProgress for StyledSpinner {
    fn inc(&self, delta: u64) {
        self.spinner.inc(delta);
    }

    fn set_message(&self, msg: &str) {
        self.spinner.set_message(msg);
    }

    fn finish_with_message(&self, msg: &str) {
        self.spinner.finish_with_message(msg);
    }

    fn println(&self, msg: &str) {
        self.spinner.println(msg);
    }
}

impl StyledBar {
    pub fn enable_steady_tick(&self, ms: u64) {
        self.pb.enable_steady_tick(ms);
    }
}

impl SlamProgress for StyledBar {
    fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }

    fn set_message(&self, msg: &str) {
        self.pb.set_message(msg);
    }

    fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg);
    }

    fn println(&self, msg: &str) {
        self.pb.println(msg);
    }
}

// ===============================================================================================

enum Styles {
    Bar,
    Spinner,
    MainSpinner,
}

impl Styles {
    fn style(&self) -> ProgressStyle {
        use Styles::{Bar, MainSpinner, Spinner};

        match self {
            Bar => ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:60.cyan/yellow} {pos:>7}/{len:7} {msg}")
                .progress_chars("#>-"),
            Spinner => ProgressStyle::default_spinner().template("{spinner} {msg}"),
            MainSpinner => ProgressStyle::default_spinner()
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
                .template("[{elapsed_precise}] {msg} {spinner.green}"),
        }
    }
}
