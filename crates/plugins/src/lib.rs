//! Plugins shipped with ledgerflow.
//!
//! [`coresystem`] is mandatory; the hash cache, transfer and secret lock
//! plugins are registered on top of it by [`register_all`].

use ledgerflow_core::{PluginError, PluginManager};

pub mod coresystem;
pub mod hashcache;
pub mod lock;
pub mod transfer;

/// Registers every shipped plugin, core system first
pub fn register_all(manager: &mut PluginManager) -> Result<(), PluginError> {
    coresystem::register_core_system(manager)?;
    hashcache::register_hash_cache_system(manager)?;
    transfer::register_transfer_plugin(manager)?;
    lock::register_secret_lock_plugin(manager)?;

    Ok(())
}
