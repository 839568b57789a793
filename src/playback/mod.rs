//! Timestamp-addressed playback
//!
//! A [`PlaybackRequest`] is resolved against the segment tree into a
//! [`PlaybackPlan`], turned into a playback pipeline, and driven by a
//! [`SeekCoordinator`] on the shared [`PlaybackDispatcher`].

mod dispatcher;
mod request;
mod resolver;
mod seek;
mod service;

pub use dispatcher::{DispatcherSettings, PlaybackDispatcher, PlaybackId, PlaybackStatus};
pub use request::{PlaybackQuery, PlaybackRequest};
pub use resolver::{select_segments, PlaybackPlan, SegmentResolver};
pub use seek::{plan_seek, CoordinatorState, Flow, PlaybackOutcome, SeekCoordinator};
pub use service::{PlaybackService, PlaybackSettings};
