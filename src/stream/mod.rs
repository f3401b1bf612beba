//! The four durable stream queues and the processor that drives them.

pub mod audio;
pub mod history;
pub mod interrupts;
pub mod processor;
pub mod script;
pub mod types;

pub use audio::AudioQueue;
pub use history::HistoryLog;
pub use interrupts::InterruptStore;
pub use processor::{StreamProcessor, TickOutcome};
pub use script::ScriptQueue;
