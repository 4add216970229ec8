pub mod accumulator;
pub mod correlation;
pub mod error;
pub mod gate;
pub mod jsonl;
pub mod mock;
pub mod runner;
pub mod title;

pub use accumulator::{AccumulatorState, TranscriptAccumulator};
pub use correlation::{CorrelationTable, Resolution};
pub use error::EngineError;
pub use gate::{SessionGate, SessionPermit};
pub use jsonl::{JsonLinesRuntime, JsonLinesSource};
pub use runner::{ChatRequest, Reconciler, RunOutcome};
pub use title::{spawn_title_task, FirstLineTitler, TitleGenerator};
