//! Progress bars fed by library progress events

use std::sync::{Arc, Once};

use imprint_core::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar labelled `operation`
///
/// A hidden bar is returned in quiet mode so callers never branch on it.
pub fn create_progress_bar(total: Option<u64>, operation: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = match total {
        Some(t) if t > 0 => ProgressBar::new(t),
        _ => ProgressBar::new_spinner(),
    };

    let style = ProgressStyle::with_template(
        "  {spinner:.green} {prefix:9} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("█▓░"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(operation.to_string());

    pb
}

/// Callback advancing `pb` by the bytes of each event
pub fn progress_callback(pb: &ProgressBar) -> ProgressCallback {
    let pb = pb.clone();
    Arc::new(move |progress: &Progress| {
        pb.inc(progress.bytes);
        pb.set_message(speed_message(progress.speed));
    })
}

/// Callback that restarts `pb` as `operation` on its first event
///
/// Lets a second phase (verification after a write) reuse the same bar.
pub fn phase_callback(pb: &ProgressBar, operation: &str) -> ProgressCallback {
    let pb = pb.clone();
    let operation = operation.to_string();
    let started = Once::new();
    Arc::new(move |progress: &Progress| {
        started.call_once(|| {
            pb.reset();
            pb.set_prefix(operation.clone());
        });
        pb.inc(progress.bytes);
        pb.set_message(speed_message(progress.speed));
    })
}

/// Speed shown next to the bar
fn speed_message(bytes_per_second: f64) -> String {
    if bytes_per_second <= 0.0 {
        return String::new();
    }
    imprint_core::format_speed(bytes_per_second as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_quiet() {
        let pb = create_progress_bar(Some(1000), "Writing", true);
        assert!(pb.is_hidden());
    }

    #[test]
    fn test_create_progress_bar_with_size() {
        let pb = create_progress_bar(Some(1000), "Writing", false);
        assert_eq!(pb.length(), Some(1000));
    }

    #[test]
    fn test_create_progress_bar_unknown_size() {
        let pb = create_progress_bar(None, "Hashing", false);
        assert_eq!(pb.length(), None);
    }

    #[test]
    fn test_progress_callback_advances_bar() {
        let pb = ProgressBar::hidden();
        pb.set_length(100);
        let callback = progress_callback(&pb);
        callback(&Progress {
            position: 40,
            bytes: 40,
            speed: 0.0,
        });
        callback(&Progress {
            position: 100,
            bytes: 60,
            speed: 2048.0,
        });
        assert_eq!(pb.position(), 100);
    }

    #[test]
    fn test_phase_callback_restarts_bar() {
        let pb = ProgressBar::hidden();
        pb.set_length(100);
        progress_callback(&pb)(&Progress {
            position: 100,
            bytes: 100,
            speed: 0.0,
        });

        let verify = phase_callback(&pb, "Verifying");
        verify(&Progress {
            position: 30,
            bytes: 30,
            speed: 0.0,
        });
        verify(&Progress {
            position: 50,
            bytes: 20,
            speed: 0.0,
        });
        assert_eq!(pb.position(), 50);
        assert_eq!(pb.prefix(), "Verifying");
    }

    #[test]
    fn test_speed_message() {
        assert_eq!(speed_message(0.0), "");
        assert!(speed_message(2048.0).ends_with("/s"));
    }
}
