//! Seams between the engine and the embedding page runtime.
//!
//! The embedder supplies one object wearing both traits: [`InstallHooks`]
//! for wrapping page APIs, [`HostPage`] for the async lookups the error
//! pipeline needs. The engine never touches page globals itself.

pub use error_enrich::HostPage;

/// Installation callbacks, split by weight.
///
/// `install_performance_observers` is the cheap phase-1 hook; the rest
/// wrap hot page APIs and run at phase 2. Every hook must be idempotent
/// and must chain to the original API it replaces: the lifecycle
/// controller may invoke an installer again after a no-op re-entry, and
/// the page has to keep working exactly as before underneath the wrap.
pub trait InstallHooks: Send + Sync {
    fn install_performance_observers(&self);
    fn install_console_hook(&self);
    fn install_network_hook(&self);
    fn install_stream_hook(&self);
    fn install_error_hooks(&self);
    fn install_interaction_hooks(&self);
}
