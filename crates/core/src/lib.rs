//! Core of the ledgerflow ingestion engine.
//!
//! Blocks and transactions enter as a [`ConsumerInput`] and flow through the
//! stages of a [`ConsumerDispatcher`]. Stages decompose entities into typed
//! notifications that plugin-registered validators check and observers apply
//! to a copy-on-write [`StateCache`].

mod cache;
mod config;
mod consumers;
mod disruptor;
mod dispatch;
mod entity;
mod handlers;
mod model;
mod notifications;
mod plugins;
mod publisher;
mod range;
mod storage;
mod validation;

pub(crate) mod subcache;

pub use cache::*;
pub use config::*;
pub use consumers::*;
pub use disruptor::*;
pub use entity::*;
pub use handlers::*;
pub use model::*;
pub use notifications::*;
pub use plugins::*;
pub use publisher::*;
pub use range::*;
pub use storage::*;
pub use subcache::{CacheName, SubCache, SubCacheDelta, SubCacheRead, SubCacheView};
pub use validation::*;
