//! Offline track content analysis

pub mod scanner;

pub use scanner::{fast_scan, FastScan, ScanOutcome, TrackScanner};
