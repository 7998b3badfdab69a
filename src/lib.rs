//! Narration core of a Spanish verb-conjugation trainer.
//!
//! Turns (tense, verb) selections into spoken audio through a remote
//! text-to-speech service, keeps every synthesized clip in a durable local
//! store, and plays single items or whole queues with pause, resume, repeat
//! and cancellation.

pub mod cache;
pub mod cancellation;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod narrator;
pub mod playback;
pub mod synthesis;
pub mod wav;

#[cfg(test)]
pub(crate) mod testing;
