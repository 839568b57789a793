//! On-disk segment corpus: index scans and retention

mod retention;
mod scanner;

pub use retention::{RetentionPolicy, RetentionSweeper, SweepReport};
pub use scanner::SegmentScanner;
