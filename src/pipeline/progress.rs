use serde::Serialize;
use std::sync::atomic::{ AtomicU8, Ordering };
use std::sync::Arc;

use crate::llm::LoadProgress;

pub const START_PERCENT: u8 = 10;
pub const DOWNLOAD_BEGIN_PERCENT: u8 = 30;
pub const DOWNLOAD_END_PERCENT: u8 = 90;
pub const INITIALIZING_PERCENT: u8 = 95;
pub const READY_PERCENT: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

pub type ProgressSink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Share of a download that has completed, in whole percent.
pub fn download_percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = (loaded.min(total) as f64) / (total as f64);
    (ratio * 100.0).round() as u8
}

/// Maps a download percentage onto the 30-90 display band.
pub fn display_percent(download: u8) -> u8 {
    let span = (DOWNLOAD_END_PERCENT - DOWNLOAD_BEGIN_PERCENT) as f64;
    DOWNLOAD_BEGIN_PERCENT + ((download.min(100) as f64) * span / 100.0).round() as u8
}

/// Forwards load progress to a sink, never letting the reported percentage go down.
pub struct ProgressReporter {
    sink: ProgressSink,
    high_water: AtomicU8,
}

impl ProgressReporter {
    pub fn new(sink: ProgressSink) -> Self {
        Self { sink, high_water: AtomicU8::new(0) }
    }

    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(READY_PERCENT);
        let previous = self.high_water.fetch_max(percent, Ordering::SeqCst);
        (self.sink)(ProgressUpdate {
            percent: previous.max(percent),
            message: message.into(),
        });
    }

    pub fn on_load_event(&self, event: LoadProgress) {
        match event {
            LoadProgress::Downloading { loaded, total } => {
                let pct = download_percent(loaded, total);
                self.report(display_percent(pct), format!("Downloading: {}%", pct));
            }
            LoadProgress::Ready => self.report(INITIALIZING_PERCENT, "Initializing model..."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting() -> (ProgressSink, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |u| sink_seen.lock().unwrap().push(u));
        (sink, seen)
    }

    #[test]
    fn download_band_mapping() {
        assert_eq!(display_percent(0), 30);
        assert_eq!(display_percent(50), 60);
        assert_eq!(display_percent(100), 90);
        assert_eq!(download_percent(1, 4), 25);
        assert_eq!(download_percent(10, 0), 0);
        assert_eq!(download_percent(12, 10), 100);
    }

    #[test]
    fn reported_percent_never_decreases() {
        let (sink, seen) = collecting();
        let reporter = ProgressReporter::new(sink);
        reporter.report(START_PERCENT, "start");
        reporter.on_load_event(LoadProgress::Downloading { loaded: 100, total: 100 });
        reporter.on_load_event(LoadProgress::Downloading { loaded: 5, total: 100 });
        reporter.on_load_event(LoadProgress::Ready);

        let updates = seen.lock().unwrap();
        let percents: Vec<u8> = updates.iter().map(|u| u.percent).collect();
        assert_eq!(percents, vec![10, 90, 90, 95]);
        assert_eq!(updates[2].message, "Downloading: 5%");
        assert_eq!(updates[3].message, "Initializing model...");
    }
}
