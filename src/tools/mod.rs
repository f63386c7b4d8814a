//! Ambient tooling: instrumentation that sits alongside the Future Model rather than
//! inside it, the same separation the teacher draws between `core` and `tools`.

pub mod monitoring;
