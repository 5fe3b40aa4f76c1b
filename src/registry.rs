use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::channel::{NativeChannel, Worker};
use crate::icon::Icon;
use crate::logs;
use crate::platform;
use crate::provider::{ProgramKey, ProgramProvider};

/// Identity of a launcher within one registry. Assigned once, at first
/// discovery, and never reused for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LauncherId(u32);

impl fmt::Display for LauncherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answers "what program opens files of this type?" against the OS
/// association database.
///
/// The registry owns a dedicated native thread; all OS queries and all
/// bookkeeping run there, serialized in submission order. [`resolve`],
/// [`list_all`] and the [`Launcher`] accessors block on a reply;
/// [`launch`] enqueues and returns immediately. Dropping the registry and
/// every handle cloned from it lets the thread wind down on its own.
///
/// [`resolve`]: LauncherRegistry::resolve
/// [`list_all`]: LauncherRegistry::list_all
/// [`launch`]: LauncherRegistry::launch
pub struct LauncherRegistry {
    channel: NativeChannel<Msg>,
}

impl LauncherRegistry {
    /// Registry backed by the operating system's association database.
    pub fn new() -> Self {
        Self::with_provider(platform::native())
    }

    /// Registry backed by a custom provider, e.g. a fake for tests.
    pub fn with_provider<P: ProgramProvider>(provider: P) -> Self {
        Self {
            channel: NativeChannel::spawn(State::new(provider)),
        }
    }

    /// Look up the program registered for the trailing `.extension` of
    /// `file_name`. A name without a dot in its final path component has
    /// no extension and never matches. Repeated calls for the same
    /// extension return handles with the same [`LauncherId`].
    pub fn resolve(&self, file_name: &str) -> Option<Launcher> {
        let file_name = file_name.to_string();
        self.channel
            .call(|reply| Msg::Resolve { file_name, reply })
            .map(|id| self.handle(id))
    }

    /// All registered programs, sorted case-insensitively by display
    /// name. The underlying enumeration runs once and is cached; later
    /// calls reuse it.
    pub fn list_all(&self) -> Vec<Launcher> {
        self.channel
            .call(|reply| Msg::ListAll { reply })
            .into_iter()
            .map(|id| self.handle(id))
            .collect()
    }

    /// Open `path` with the given program. Fire and forget: the call
    /// returns once the request is queued, and the open action runs on
    /// the native thread in FIFO order with everything else.
    pub fn launch(&self, launcher: &Launcher, path: impl AsRef<Path>) {
        self.channel.post(Msg::Open {
            id: launcher.id,
            path: path.as_ref().to_path_buf(),
        });
    }

    /// Dimensions of every icon handed out by this registry. The OS is
    /// asked once; the answer is constant afterwards.
    pub fn icon_size(&self) -> (u32, u32) {
        self.channel.call(|reply| Msg::IconSize { reply })
    }

    fn handle(&self, id: LauncherId) -> Launcher {
        Launcher {
            id,
            channel: self.channel.clone(),
        }
    }
}

impl Default for LauncherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one registered program. Cheap to clone; all accessors are
/// marshalled through the owning registry's native thread.
#[derive(Clone)]
pub struct Launcher {
    id: LauncherId,
    channel: NativeChannel<Msg>,
}

impl Launcher {
    pub fn id(&self) -> LauncherId {
        self.id
    }

    /// Display name reported by the OS, fetched once and cached.
    pub fn name(&self) -> String {
        self.channel.call(|reply| Msg::Name { id: self.id, reply })
    }

    /// Program icon, scaled to the registry's icon size. Programs the OS
    /// has no icon for all share one placeholder instance.
    pub fn icon(&self) -> Arc<Icon> {
        self.channel.call(|reply| Msg::Icon { id: self.id, reply })
    }

    /// Extensions registered for this program, in discovery order.
    pub fn extensions(&self) -> Vec<String> {
        self.channel
            .call(|reply| Msg::Extensions { id: self.id, reply })
    }

    /// Open `path` with this program. Fire and forget.
    pub fn open(&self, path: impl AsRef<Path>) {
        self.channel.post(Msg::Open {
            id: self.id,
            path: path.as_ref().to_path_buf(),
        });
    }
}

impl PartialEq for Launcher {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Launcher {}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Launcher").field(&self.id).finish()
    }
}

pub(crate) enum Msg {
    Resolve {
        file_name: String,
        reply: Sender<Option<LauncherId>>,
    },
    ListAll {
        reply: Sender<Vec<LauncherId>>,
    },
    Name {
        id: LauncherId,
        reply: Sender<String>,
    },
    Icon {
        id: LauncherId,
        reply: Sender<Arc<Icon>>,
    },
    Extensions {
        id: LauncherId,
        reply: Sender<Vec<String>>,
    },
    IconSize {
        reply: Sender<(u32, u32)>,
    },
    Open {
        id: LauncherId,
        path: PathBuf,
    },
}

struct Record {
    key: ProgramKey,
    name: String,
    extensions: Vec<String>,
    icon: Option<Arc<Icon>>,
    icon_fetched: bool,
}

/// Registry state, owned by the native channel thread.
struct State<P> {
    provider: P,
    records: HashMap<LauncherId, Record>,
    by_key: HashMap<ProgramKey, LauncherId>,
    next_id: u32,
    all_loaded: bool,
    icon_size: Option<(u32, u32)>,
    placeholder: Option<Arc<Icon>>,
}

impl<P: ProgramProvider> State<P> {
    fn new(provider: P) -> Self {
        Self {
            provider,
            records: HashMap::new(),
            by_key: HashMap::new(),
            next_id: 0,
            all_loaded: false,
            icon_size: None,
            placeholder: None,
        }
    }

    /// Record for an OS program, created on first sight. Ids are handed
    /// out by a counter that only ever moves forward.
    fn intern(&mut self, key: ProgramKey) -> LauncherId {
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }

        let id = LauncherId(self.next_id);
        self.next_id += 1;

        let name = self
            .provider
            .display_name(&key)
            .unwrap_or_else(|| key.as_str().to_string());
        let extensions = self.provider.extensions(&key);

        self.by_key.insert(key.clone(), id);
        self.records.insert(
            id,
            Record {
                key,
                name,
                extensions,
                icon: None,
                icon_fetched: false,
            },
        );
        id
    }

    fn resolve(&mut self, file_name: &str) -> Option<LauncherId> {
        let extension = file_extension(file_name)?;
        let key = self.provider.program_for_extension(&extension)?;
        let id = self.intern(key);

        if let Some(record) = self.records.get_mut(&id)
            && !record.extensions.iter().any(|e| *e == extension)
        {
            record.extensions.push(extension);
        }
        Some(id)
    }

    fn list_all(&mut self) -> Vec<LauncherId> {
        if !self.all_loaded {
            let programs = self.provider.all_programs();
            logs::log_info(&format!("Enumerated {} registered programs", programs.len()));
            for key in programs {
                self.intern(key);
            }
            self.all_loaded = true;
        }

        let mut ids: Vec<LauncherId> = self.records.keys().copied().collect();
        ids.sort_by(|a, b| {
            let (na, nb) = (&self.records[a].name, &self.records[b].name);
            na.to_lowercase()
                .cmp(&nb.to_lowercase())
                .then_with(|| na.cmp(nb))
                .then(a.cmp(b))
        });
        ids
    }

    fn icon(&mut self, id: LauncherId) -> Arc<Icon> {
        let size = self.icon_size();

        let pending = match self.records.get(&id) {
            Some(record) if !record.icon_fetched => Some(record.key.clone()),
            _ => None,
        };
        if let Some(key) = pending {
            let icon = self
                .provider
                .icon(&key)
                .map(|image| Arc::new(Icon::scaled(&image, size)));
            if let Some(record) = self.records.get_mut(&id) {
                record.icon = icon;
                record.icon_fetched = true;
            }
        }

        match self.records.get(&id).and_then(|record| record.icon.clone()) {
            Some(icon) => icon,
            None => self.placeholder(size),
        }
    }

    /// Shared placeholder for every program the OS has no icon for,
    /// synthesized lazily once per registry.
    fn placeholder(&mut self, (width, height): (u32, u32)) -> Arc<Icon> {
        self.placeholder
            .get_or_insert_with(|| Arc::new(Icon::placeholder(width, height)))
            .clone()
    }

    fn icon_size(&mut self) -> (u32, u32) {
        match self.icon_size {
            Some(size) => size,
            None => {
                let size = self.provider.icon_size();
                self.icon_size = Some(size);
                size
            }
        }
    }

    fn open(&mut self, id: LauncherId, path: &Path) {
        if let Some(record) = self.records.get(&id) {
            logs::log_info(&format!("Opening {} with {}", path.display(), record.name));
            self.provider.open(&record.key, path);
        }
    }
}

impl<P: ProgramProvider> Worker for State<P> {
    type Msg = Msg;

    fn update(&mut self, msg: Msg) {
        match msg {
            Msg::Resolve { file_name, reply } => {
                let _ = reply.send(self.resolve(&file_name));
            }
            Msg::ListAll { reply } => {
                let _ = reply.send(self.list_all());
            }
            Msg::Name { id, reply } => {
                let name = self
                    .records
                    .get(&id)
                    .map(|record| record.name.clone())
                    .unwrap_or_default();
                let _ = reply.send(name);
            }
            Msg::Icon { id, reply } => {
                let _ = reply.send(self.icon(id));
            }
            Msg::Extensions { id, reply } => {
                let extensions = self
                    .records
                    .get(&id)
                    .map(|record| record.extensions.clone())
                    .unwrap_or_default();
                let _ = reply.send(extensions);
            }
            Msg::IconSize { reply } => {
                let _ = reply.send(self.icon_size());
            }
            Msg::Open { id, path } => self.open(id, &path),
        }
    }
}

/// Trailing `.suffix` of the final path component, lowercased. A name
/// without a dot has no extension; a leading dot counts (".bashrc" is its
/// own extension, matching how the OS databases file dotfiles).
fn file_extension(file_name: &str) -> Option<String> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let dot = base.rfind('.')?;
    Some(base[dot..].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// One OS program as a fake provider sees it: `matches` feeds
    /// extension lookup, `advertised` is what the OS reports as the
    /// program's registered extension list.
    #[derive(Clone)]
    struct FakeProgram {
        key: &'static str,
        name: &'static str,
        matches: &'static [&'static str],
        advertised: &'static [&'static str],
        has_icon: bool,
    }

    fn program(
        key: &'static str,
        name: &'static str,
        extensions: &'static [&'static str],
    ) -> FakeProgram {
        FakeProgram {
            key,
            name,
            matches: extensions,
            advertised: extensions,
            has_icon: false,
        }
    }

    struct FakeProvider {
        programs: Vec<FakeProgram>,
        events: Arc<Mutex<Vec<String>>>,
        open_delay: Duration,
    }

    impl FakeProvider {
        fn new(programs: Vec<FakeProgram>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            let provider = Self {
                programs,
                events: Arc::clone(&events),
                open_delay: Duration::ZERO,
            };
            (provider, events)
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn find(&self, program: &ProgramKey) -> Option<&FakeProgram> {
            self.programs.iter().find(|p| p.key == program.as_str())
        }
    }

    impl ProgramProvider for FakeProvider {
        fn program_for_extension(&mut self, extension: &str) -> Option<ProgramKey> {
            self.record(format!("lookup {extension}"));
            self.programs
                .iter()
                .find(|p| p.matches.contains(&extension))
                .map(|p| ProgramKey::new(p.key))
        }

        fn all_programs(&mut self) -> Vec<ProgramKey> {
            self.record("enumerate".to_string());
            self.programs
                .iter()
                .map(|p| ProgramKey::new(p.key))
                .collect()
        }

        fn display_name(&mut self, program: &ProgramKey) -> Option<String> {
            self.find(program).map(|p| p.name.to_string())
        }

        fn extensions(&mut self, program: &ProgramKey) -> Vec<String> {
            self.find(program)
                .map(|p| p.advertised.iter().map(|e| e.to_string()).collect())
                .unwrap_or_default()
        }

        fn icon(&mut self, program: &ProgramKey) -> Option<DynamicImage> {
            self.find(program).filter(|p| p.has_icon).map(|_| {
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])))
            })
        }

        fn icon_size(&mut self) -> (u32, u32) {
            self.record("icon-size".to_string());
            (16, 16)
        }

        fn open(&mut self, program: &ProgramKey, path: &Path) {
            if !self.open_delay.is_zero() {
                thread::sleep(self.open_delay);
            }
            self.record(format!("open {} {}", program.as_str(), path.display()));
        }
    }

    fn viewer() -> FakeProgram {
        program("viewer", "Image Viewer", &[".png", ".jpg"])
    }

    #[test]
    fn resolve_is_identity_stable() {
        let (provider, _) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        let first = registry.resolve("photo.png").unwrap();
        let second = registry.resolve("other.png").unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first, second);
    }

    #[test]
    fn names_without_a_dot_never_match() {
        let (provider, events) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        assert!(registry.resolve("Makefile").is_none());
        assert!(registry.resolve("reports.2024/summary").is_none());
        // No extension, so the OS was never asked.
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_extensions_resolve_to_none() {
        let (provider, _) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        assert!(registry.resolve("archive.zip").is_none());
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let (provider, _) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        let lower = registry.resolve("photo.png").unwrap();
        let upper = registry.resolve("PHOTO.PNG").unwrap();
        assert_eq!(lower.id(), upper.id());
    }

    #[test]
    fn resolve_reports_name_and_extensions() {
        let (provider, _) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        let launcher = registry.resolve("photo.png").unwrap();
        assert_eq!(launcher.name(), "Image Viewer");
        assert_eq!(launcher.extensions(), vec![".png", ".jpg"]);
    }

    #[test]
    fn newly_seen_extensions_are_appended_once() {
        // The fake OS matches both extensions but advertises neither, so
        // the record's extension set grows only through resolution.
        let mut editor = program("editor", "Editor", &[".txt", ".log"]);
        editor.advertised = &[];
        let (provider, _) = FakeProvider::new(vec![editor]);
        let registry = LauncherRegistry::with_provider(provider);

        let by_txt = registry.resolve("notes.txt").unwrap();
        assert_eq!(by_txt.extensions(), vec![".txt"]);

        let by_log = registry.resolve("build.log").unwrap();
        assert_eq!(by_log.id(), by_txt.id());
        assert_eq!(by_log.extensions(), vec![".txt", ".log"]);

        // Resolving again must not duplicate.
        registry.resolve("again.txt").unwrap();
        assert_eq!(by_txt.extensions(), vec![".txt", ".log"]);
    }

    #[test]
    fn list_all_sorts_case_insensitively_by_name() {
        let (provider, _) = FakeProvider::new(vec![
            program("z", "zzz", &[".z"]),
            program("a", "Apple", &[".a"]),
            program("b", "banana", &[".b"]),
        ]);
        let registry = LauncherRegistry::with_provider(provider);

        let names: Vec<String> = registry.list_all().iter().map(Launcher::name).collect();
        assert_eq!(names, vec!["Apple", "banana", "zzz"]);
    }

    #[test]
    fn list_all_is_idempotent_and_enumerates_once() {
        let (provider, events) = FakeProvider::new(vec![
            program("z", "zzz", &[".z"]),
            program("a", "Apple", &[".a"]),
        ]);
        let registry = LauncherRegistry::with_provider(provider);

        let first: Vec<LauncherId> = registry.list_all().iter().map(Launcher::id).collect();
        let second: Vec<LauncherId> = registry.list_all().iter().map(Launcher::id).collect();
        assert_eq!(first, second);

        let enumerations = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "enumerate")
            .count();
        assert_eq!(enumerations, 1);
    }

    #[test]
    fn missing_icons_share_the_placeholder_instance() {
        let (provider, _) = FakeProvider::new(vec![
            program("a", "Apple", &[".a"]),
            program("b", "banana", &[".b"]),
        ]);
        let registry = LauncherRegistry::with_provider(provider);

        let apple = registry.resolve("x.a").unwrap().icon();
        let banana = registry.resolve("x.b").unwrap().icon();
        assert!(Arc::ptr_eq(&apple, &banana));
        assert_eq!((apple.width(), apple.height()), registry.icon_size());
    }

    #[test]
    fn native_icons_are_scaled_not_replaced() {
        let mut painter = program("painter", "Painter", &[".bmp"]);
        painter.has_icon = true;
        let (provider, _) = FakeProvider::new(vec![painter, program("a", "Apple", &[".a"])]);
        let registry = LauncherRegistry::with_provider(provider);

        let icon = registry.resolve("x.bmp").unwrap().icon();
        let fallback = registry.resolve("x.a").unwrap().icon();
        assert!(!Arc::ptr_eq(&icon, &fallback));
        assert_eq!((icon.width(), icon.height()), (16, 16));
        assert_eq!(icon.as_rgba().get_pixel(4, 4), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn icon_size_is_queried_once() {
        let (provider, events) = FakeProvider::new(vec![viewer()]);
        let registry = LauncherRegistry::with_provider(provider);

        assert_eq!(registry.icon_size(), (16, 16));
        assert_eq!(registry.icon_size(), (16, 16));

        let queries = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "icon-size")
            .count();
        assert_eq!(queries, 1);
    }

    #[test]
    fn launch_never_blocks_the_caller() {
        let (mut provider, events) = FakeProvider::new(vec![viewer()]);
        provider.open_delay = Duration::from_millis(200);
        let registry = LauncherRegistry::with_provider(provider);
        let launcher = registry.resolve("photo.png").unwrap();

        let started = Instant::now();
        registry.launch(&launcher, "/tmp/photo.png");
        assert!(started.elapsed() < Duration::from_millis(100));

        // FIFO on the native channel: this synchronous read queues behind
        // the open and only returns once it finished.
        let _ = launcher.name();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e == "open viewer /tmp/photo.png")
        );
    }

    #[test]
    fn extension_parsing_takes_the_final_component() {
        assert_eq!(file_extension("a.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(file_extension("photo.PNG").as_deref(), Some(".png"));
        assert_eq!(file_extension(".bashrc").as_deref(), Some(".bashrc"));
        assert_eq!(file_extension("dir.d/plain").as_deref(), None);
        assert_eq!(file_extension("dir.d\\plain").as_deref(), None);
        assert_eq!(file_extension("trailing.").as_deref(), Some("."));
        assert_eq!(file_extension("plain"), None);
    }
}
