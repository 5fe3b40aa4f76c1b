#[path = "platforms/windows.rs"]
#[cfg(windows)]
mod windows;

#[path = "platforms/macos.rs"]
#[cfg(target_os = "macos")]
mod macos;

#[path = "platforms/linux.rs"]
#[cfg(target_os = "linux")]
mod linux;

use crate::provider::ProgramProvider;

/// Association provider for the running operating system.
pub(crate) fn native() -> impl ProgramProvider {
    #[cfg(windows)]
    {
        windows::Associations::new()
    }

    #[cfg(target_os = "macos")]
    {
        macos::Associations::new()
    }

    #[cfg(target_os = "linux")]
    {
        linux::Associations::new()
    }
}
