//! Single-line terminal progress bar for batch runs.

use std::io::Write;

const BAR_WIDTH: usize = 40;

/// `"<label>: 50%|████----| 15/30"`
pub fn render_progress(label: &str, done: usize, total: usize, width: usize) -> String {
    let fraction = if total == 0 {
        1.0
    } else {
        (done.min(total) as f64) / (total as f64)
    };
    let filled = ((width as f64) * fraction) as usize;
    let percent = (fraction * 100.0).round() as u32;
    format!(
        "{label}: {percent}%|{}{}| {done}/{total}",
        "█".repeat(filled),
        "-".repeat(width - filled)
    )
}

/// Redraws the bar in place on stdout.
pub struct ProgressBar {
    label: String,
}

impl ProgressBar {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn update(&self, done: usize, total: usize) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r{}", render_progress(&self.label, done, total, BAR_WIDTH));
        let _ = out.flush();
    }

    pub fn finish(&self) {
        println!();
    }
}
