//! Production adapters over the session engine and the REST transport.
//!
//! [`DashScope`] hands out each of them with a shared configuration; the
//! engine types stay available under `crate::session` when you need a
//! protocol shape of your own.

mod builder;
mod conversation;
mod half_duplex;
mod recognition;
mod synthesis;
mod tasks;

pub use builder::{DashScope, DashScopeBuilder};
pub use conversation::Conversation;
pub use half_duplex::{HalfDuplex, fold_results};
pub use recognition::{Recognition, RecognitionResult, Sentence};
pub use synthesis::SpeechSynthesizer;
pub use tasks::{AsyncTasks, PollBackoff, WaitPolicy};
