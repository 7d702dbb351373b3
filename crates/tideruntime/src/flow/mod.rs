//! Queue-driven scheduler with tiered users.
//!
//! Operators notify their users when their value is replaced, and only
//! their field and content users when the value is mutated in place.
//! Notified operators wait in a queue ordered by operator index.

mod builder;
mod context;
mod operator;

pub use builder::{FlowBuilder, FlowDefinition};
pub use context::{FlowContext, FlowStatus};
pub use operator::{FlowKind, FlowOperator};
