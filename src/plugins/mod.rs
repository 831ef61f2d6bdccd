//! Experiment plumbing: codebase acquisition, overlays, image builds,
//! artifact storage, deployment platforms and the sandbox worker.

pub mod completers;
pub mod evaluator;
pub mod git;
pub mod image;
pub mod overlay;
pub mod platform;
pub mod sandbox;
pub mod storage;
