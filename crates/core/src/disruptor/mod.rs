//! Staged processing of entity batches.
//!
//! A [`ConsumerDispatcher`] owns a bounded ring of in-flight elements and one
//! worker per consumer stage. Each stage advances its own barrier after it
//! finishes an element; a stage only looks at positions its upstream barrier
//! has already passed, and the producer only publishes while the last stage
//! is less than a full ring behind.

mod barriers;
mod dispatcher;
mod input;

pub use barriers::*;
pub use dispatcher::*;
pub use input::*;
