//! Look up and launch the programs the operating system registers for
//! file types.
//!
//! A [`LauncherRegistry`] answers "what program opens files like this?"
//! and "what programs are registered at all?", handing out identity-stable
//! [`Launcher`] handles with a display name, a fixed-size icon and the set
//! of registered extensions. Opening a file is fire-and-forget.
//!
//! All OS-facing queries run on a single dedicated native thread owned by
//! the registry; the underlying registration APIs are not safe to call
//! from arbitrary threads on every platform. Synchronous calls block until
//! that thread replies, `open`/`launch` merely enqueue.
//!
//! ```no_run
//! use openwith::LauncherRegistry;
//!
//! let registry = LauncherRegistry::new();
//! if let Some(launcher) = registry.resolve("report.pdf") {
//!     println!("{} opens PDF files", launcher.name());
//!     launcher.open("report.pdf");
//! }
//! ```

mod channel;
mod icon;
mod logs;
mod platform;
mod provider;
mod registry;

pub use icon::Icon;
pub use provider::{ProgramKey, ProgramProvider};
pub use registry::{Launcher, LauncherId, LauncherRegistry};
