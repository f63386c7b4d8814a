//! Client SDK for durable, asynchronous function-composition graphs executed by a
//! remote Flow service.
//!
//! A process embeds this crate by calling [`dispatch::with_flow`] from its FaaS
//! entry point. On a fresh invocation, the supplied closure receives a
//! [`flow::Flow`] handle and builds a graph of [`flow::FlowFuture`]s using the
//! composition algebra (`then_apply`, `then_compose`, `all_of`, ...); on a
//! continuation invocation, the same entry point instead runs exactly one
//! previously-registered [`action::ActionRegistry`] action and reports its result,
//! without calling the closure at all.
//!
//! ```text
//! action registration (module init, every invocation)
//!           |
//!           v
//! dispatch::with_flow  --fresh-->  flow::Flow::{supply,then_apply,...}  --commit
//!           |
//!            --continuation-->  continuation::run_continuation
//! ```

pub mod action;
pub mod blob;
pub mod codec;
pub mod config;
pub mod continuation;
pub mod datum;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod service_client;
pub mod tools;

/// Commonly-imported names for building a flow graph.
pub mod prelude {
    pub use crate::action::{Action0, Action1, Action2, ActionRegistry};
    pub use crate::codec::{ErrorMessage, Gob, HttpRequestValue, HttpResponseValue};
    pub use crate::config::Config;
    pub use crate::dispatch::{current_flow, with_flow, EntryConfig, EntryRequest, EntryResponse};
    pub use crate::error::FlowError;
    pub use crate::flow::{Flow, FlowFuture, Unknown};
}
