//! Built-in tools that belong to the step-execution core itself: context
//! tagging for compaction retention, and the time-travel signal producer.
//! Everything else (file edits, shell, web) lives in the embedding runtime.

pub mod tag_context;
pub mod time_travel;

pub use tag_context::TagContext;
pub use time_travel::SendDispatch;
