//! Roadmap, track, task and iteration store for agent-driven development.
//!
//! Each project lives in its own SQLite file. [`project::Workspace`] maps
//! project names to stores and [`db::Repository`] enforces the invariants
//! over one store: acyclic track dependencies, acceptance criteria gating of
//! task and iteration completion, a single current iteration, and per-kind
//! id sequences.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gate;
pub mod graph;
pub mod models;
pub mod project;

pub use db::{Repository, SequenceKind};
pub use error::{Error, ErrorKind, GateReport, Result};
pub use project::{ProjectContext, ProjectName, Workspace};
