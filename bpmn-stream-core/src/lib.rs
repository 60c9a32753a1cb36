//! bpmn-stream-core: the deterministic command-processing core of a BPMN
//! workflow engine.
//!
//! ## Layers
//!
//! - `types`: records, intents, rejections and record values
//! - `state`: store contracts and the in-memory store
//! - `appliers` / `writers`: the only paths from a processor to state and log
//! - `processor` / `authorization`: dispatch and the permission wrapper
//! - `usertask`, `cancel`, `job`, `timer`: the command processors
//! - `engine` / `stream`: transaction per command, single-writer log loop
//!
//! ## Determinism
//!
//! Every state change is an event applied through [`appliers::EventAppliers`],
//! both while processing and during replay. Keys come from the state's own
//! generator, so two cores fed the same commands produce the same log and the
//! same state fingerprint.

pub mod appliers;
pub mod authorization;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod processor;
pub mod scheduled;
pub mod state;
pub mod stream;
pub mod timer;
pub mod types;
pub mod usertask;
pub mod writers;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ProcessingError};
pub use state::{MemoryState, SharedState};
pub use stream::{LoggedRecord, StreamPhase, StreamProcessor};
pub use writers::ProcessingResult;
