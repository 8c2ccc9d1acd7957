use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use tether_connector::Status;

pub trait Tracker {
    type Ctx: Clone;
    fn new(ctx: Self::Ctx) -> Self;
    fn update(&self, status: Status);
    fn println(&self, line: &str);
    fn finish(&self, msg: Option<String>);
}

const PB_STYLE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} requests ({msg})";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

static PB_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    let pb_style = match ProgressStyle::with_template(PB_STYLE) {
        Ok(pb_style) => pb_style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => return None,
    };

    Some(pb_style)
});

/// Progress bar fed by the connector's status counters.
#[derive(Clone)]
pub struct ProgressTracker {
    pub pb: ProgressBar,
}

#[derive(Debug, Clone)]
pub struct ProgressTrackerConfig {
    pub len: u64,
    pub hidden: bool,
}

impl Tracker for ProgressTracker {
    type Ctx = ProgressTrackerConfig;

    fn new(ctx: Self::Ctx) -> Self {
        let pb = if ctx.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(ctx.len)
        };

        let pb_style = PB_TEMPLATE.clone().unwrap_or_else(ProgressStyle::default_bar);
        pb.set_style(pb_style);
        ProgressTracker { pb }
    }

    fn update(&self, status: Status) {
        // Totals are per wave and reset to zero once everything is processed.
        if status.total == 0 {
            return;
        }
        self.pb.set_length(status.total as u64);
        self.pb.set_position(status.finished as u64);
        self.pb.set_message(format!("{} active", status.active));
    }

    fn println(&self, line: &str) {
        if self.pb.is_hidden() {
            println!("{line}");
        } else {
            self.pb.println(line);
        }
    }

    fn finish(&self, msg: Option<String>) {
        if let Some(msg) = msg {
            self.pb.finish_with_message(msg);
        }
        self.pb.finish();
    }
}
