//! Terminal presentation for the binaries.

use chrono::{Local, TimeZone};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::detect::{PredictionResult, Statistics};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
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

pub fn detection_summary(count: usize) -> String {
    format!("{} object(s) detected", count)
}

/// Local date and time for an epoch-millisecond timestamp.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{timestamp_ms}"),
    }
}

/// One-line history entry.
pub fn format_prediction_line(p: &PredictionResult) -> String {
    let classes = p.class_names();
    let classes = if classes.is_empty() {
        "-".to_string()
    } else {
        classes.join(", ")
    };
    format!(
        "{}  {}  {}  [{}]  {}",
        p.id,
        format_timestamp(p.timestamp_ms),
        detection_summary(p.detections.len()),
        classes,
        p.image_uri
    )
}

/// Multi-line detail view of one prediction.
pub fn format_prediction_detail(p: &PredictionResult) -> String {
    let mut out = format!(
        "Prediction {}\n  image: {}\n  date:  {}\n  model: {}\n  {}\n",
        p.id,
        p.image_uri,
        format_timestamp(p.timestamp_ms),
        p.model_used,
        detection_summary(p.detections.len())
    );
    for (i, d) in p.detections.iter().enumerate() {
        let b = d.bounding_box;
        out.push_str(&format!(
            "  #{:<2} {:<12} {:>5.1}%  x={:.0} y={:.0} w={:.0} h={:.0}\n",
            i + 1,
            d.class_name,
            d.confidence * 100.0,
            b.x,
            b.y,
            b.width,
            b.height
        ));
    }
    out
}

pub fn format_statistics(stats: &Statistics) -> String {
    format!(
        "Total predictions:   {}\nTotal detections:    {}\nAverage confidence:  {:.1}%\nMost detected class: {}\n",
        stats.total_predictions,
        stats.total_detections,
        stats.average_confidence * 100.0,
        stats.most_detected_class.as_deref().unwrap_or("-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn prediction(n: usize) -> PredictionResult {
        PredictionResult {
            id: "1700000000000".into(),
            image_uri: "file:///tmp/a.jpg".into(),
            detections: (0..n)
                .map(|_| Detection {
                    class_name: "durian".into(),
                    confidence: 0.9,
                    bounding_box: BoundingBox {
                        x: 10.0,
                        y: 20.0,
                        width: 30.0,
                        height: 40.0,
                    },
                })
                .collect(),
            timestamp_ms: 1_700_000_000_000,
            model_used: "Durian Detection Model".into(),
        }
    }

    #[test]
    fn line_names_count_and_classes() {
        let line = format_prediction_line(&prediction(2));
        assert!(line.contains("2 object(s) detected"));
        assert!(line.contains("[durian]"));
        assert!(format_prediction_line(&prediction(0)).contains("[-]"));
    }

    #[test]
    fn detail_lists_each_detection() {
        let detail = format_prediction_detail(&prediction(2));
        assert!(detail.contains("Durian Detection Model"));
        assert!(detail.contains("#1"));
        assert!(detail.contains("#2"));
        assert!(detail.contains("90.0%"));
    }

    #[test]
    fn statistics_without_class_show_dash() {
        let text = format_statistics(&Statistics::default());
        assert!(text.contains("Most detected class: -"));
        assert!(text.contains("0.0%"));
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
