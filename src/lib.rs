//! code-evolve: Island-based program database for LLM-driven code evolution.
//!
//! Maintains an evolving population of candidate implementations of a single
//! target function. Registered programs are grouped into clusters by their
//! score signature (the ordered vector of per-test scores); prompt
//! generation samples a temperature-annealed subset of high-scoring
//! clusters and assembles the sampled variants into a versioned prompt
//! asking a code-generating oracle for the next version.
//!
//! The outer loop (oracle calls, evaluation harness, multi-island
//! scheduling) lives outside this crate; it feeds scores in through
//! [`Island::register_program`] and reads prompts out through
//! [`Island::get_prompt`].

pub mod code;
pub mod island;
pub mod sampling;

pub use code::{rename_function_calls, Function, ParseError, Program};
pub use island::{Cluster, Island, IslandConfig, IslandError, Signature};
