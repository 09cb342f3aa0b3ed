use cachevisor_core::ProcessManagerFactory;
use std::sync::Arc;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = cachevisor_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = cachevisor_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return cachevisor_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return cachevisor_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return cachevisor_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return cachevisor_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Process manager of the platform this binary was built for
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;

/// Convenience function to create a shareable platform process manager
pub fn create_process_manager() -> Arc<PlatformProcessManager> {
    Arc::new(PlatformProcessManagerFactory::create_process_manager())
}
