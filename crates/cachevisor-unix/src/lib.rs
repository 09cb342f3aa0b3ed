//! Unix-specific process management implementation
#![cfg(unix)]

mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

/// Unix-specific process manager factory
pub struct UnixProcessManagerFactory;

impl cachevisor_core::ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        use cachevisor_core::ProcessManager;
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
