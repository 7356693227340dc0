pub mod progress;
pub mod sanitize;

pub use progress::{ ProgressReporter, ProgressSink, ProgressUpdate };
pub use sanitize::{ sanitize, FALLBACK_REPLY };
