use std::path::Path;

use image::DynamicImage;

/// Opaque handle to an OS-registered program: a ProgID on Windows, a
/// desktop entry id on Linux, an application bundle path on macOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey(String);

impl ProgramKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The OS side of a [`LauncherRegistry`](crate::LauncherRegistry).
///
/// Every method is invoked on the registry's native channel thread, never
/// concurrently, so implementations may cache freely behind `&mut self`.
/// "Not registered" is an absent result, not an error; anything that goes
/// wrong underneath should be swallowed into `None` and logged.
pub trait ProgramProvider: Send + 'static {
    /// Program registered for a lowercase extension such as `".png"`.
    fn program_for_extension(&mut self, extension: &str) -> Option<ProgramKey>;

    /// Every registered program. Called at most once per registry.
    fn all_programs(&mut self) -> Vec<ProgramKey>;

    /// Human-readable program name, if the OS has one.
    fn display_name(&mut self, program: &ProgramKey) -> Option<String>;

    /// Extensions registered for the program, in registration order, each
    /// beginning with `'.'`.
    fn extensions(&mut self, program: &ProgramKey) -> Vec<String>;

    /// Native icon at whatever size the OS stores. `None` makes the
    /// registry substitute its shared placeholder icon.
    fn icon(&mut self, program: &ProgramKey) -> Option<DynamicImage>;

    /// Dimensions registry icons are scaled to. Queried once.
    fn icon_size(&mut self) -> (u32, u32);

    /// Invoke the OS "open" action for `path` with the given program.
    /// Fire and forget: no result, no retry.
    fn open(&mut self, program: &ProgramKey, path: &Path);
}
