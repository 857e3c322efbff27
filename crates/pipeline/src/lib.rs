//! `voice-inbox-pipeline` — candidate selection, journal rendering and the
//! command runner tying the state store to the collaborator ports.

pub mod journal;
pub mod result;
pub mod runner;
pub mod selector;

pub use result::{CommandKind, ExitStatus, RunResult};
pub use runner::{Collaborators, PipelineError, Runner, RunnerConfig};
pub use selector::{select_candidates, Candidate, CandidateKind};
