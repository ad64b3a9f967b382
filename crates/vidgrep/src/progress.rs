use std::borrow::Cow;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

const EWMA_ALPHA: f64 = 0.1;

/// Terminal progress for a sampling run. Renders a bar when the frame total
/// is known up front and a spinner otherwise.
pub struct ConsoleProgress {
    bar: ProgressBar,
    total: Option<u64>,
    processed: u64,
    ocr_ms: Option<f64>,
    rows: u64,
    started: Instant,
}

impl ConsoleProgress {
    pub fn new(total_frames: Option<u64>) -> Self {
        let bar = match total_frames {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} {bar:40.cyan/blue} {percent:>3.bold}% {pos:>5}/{len:<5} [{elapsed_precise:.dim}<{eta_precise:.dim}] {msg:.yellow}",
                    )
                    .expect("invalid sampling bar template")
                    .progress_chars("█▉▊▋▌▍▎▏ "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:.bold} {spinner:.cyan.bold} [{elapsed_precise:.dim}] {pos:>5}f {msg:.yellow}",
                    )
                    .expect("invalid sampling spinner template")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        Self {
            bar,
            total: total_frames,
            processed: 0,
            ocr_ms: None,
            rows: 0,
            started: Instant::now(),
        }
    }

    pub fn set_prefix(&self, prefix: impl Into<Cow<'static, str>>) {
        self.bar.set_prefix(prefix);
    }

    /// Advances the display for one decoded frame, sampled or not.
    pub fn observe_frame(&mut self, frame_index: Option<u64>) {
        self.processed = self.processed.saturating_add(1);
        match self.total {
            Some(total) => {
                let position = frame_index
                    .map(|index| index.saturating_add(1).min(total))
                    .unwrap_or_else(|| self.processed.min(total));
                self.bar.set_position(position);
            }
            None => self.bar.inc(1),
        }
        self.refresh_message();
    }

    /// Folds one recognition pass into the running stats.
    pub fn observe_recognition(&mut self, elapsed: Duration, rows_written: u64) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.ocr_ms = Some(match self.ocr_ms {
            Some(prev) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev,
            None => sample,
        });
        self.rows = self.rows.saturating_add(rows_written);
        self.refresh_message();
    }

    fn refresh_message(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        };
        let message = match self.ocr_ms {
            Some(ms) => format!("{rate:.1} fps • ocr {ms:.0}ms • {} rows", self.rows),
            None => format!("{rate:.1} fps"),
        };
        self.bar.set_message(message);
    }

    pub fn fail(&self, reason: &str) {
        self.bar
            .abandon_with_message(format!("failed after {} frames: {}", self.processed, reason));
    }

    pub fn finish(&self) {
        match self.total {
            Some(total) => self
                .bar
                .finish_with_message(format!("processed {}/{} frames", self.processed, total)),
            None => self
                .bar
                .finish_with_message(format!("processed {} frames", self.processed)),
        }
    }
}
