use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use freedesktop_desktop_entry::{DesktopEntry, Iter, default_paths};
use image::DynamicImage;

use crate::logs;
use crate::provider::{ProgramKey, ProgramProvider};

const ICON_SIZE: (u32, u32) = (48, 48);

/// File associations via the freedesktop stack: shared-mime-info glob
/// files map extensions to MIME types, `mimeapps.list` and desktop
/// entries map MIME types to programs. Program keys are desktop entry
/// ids such as `"org.gnome.Evince.desktop"`.
pub struct Associations {
    globs: Option<Globs>,
    entries: Option<DesktopIndex>,
    defaults: Option<HashMap<String, String>>,
    handlers: Option<HashMap<String, String>>,
}

impl Associations {
    pub fn new() -> Self {
        Self {
            globs: None,
            entries: None,
            defaults: None,
            handlers: None,
        }
    }

    fn globs(&mut self) -> &Globs {
        self.globs.get_or_insert_with(Globs::load)
    }

    fn entries(&mut self) -> &DesktopIndex {
        self.entries.get_or_insert_with(DesktopIndex::load)
    }

    fn defaults(&mut self) -> &HashMap<String, String> {
        self.defaults.get_or_insert_with(load_defaults)
    }

    fn handlers(&mut self) -> &HashMap<String, String> {
        if self.handlers.is_none() {
            let scanned = self.scan_handlers();
            self.handlers = Some(scanned);
        }
        self.handlers.get_or_insert_with(HashMap::new)
    }

    /// Map every MIME type to the first desktop entry claiming it, in
    /// XDG precedence order. Used when `mimeapps.list` names no default.
    fn scan_handlers(&mut self) -> HashMap<String, String> {
        let index = self.entries.get_or_insert_with(DesktopIndex::load);
        let mut handlers: HashMap<String, String> = HashMap::new();
        for (id, path) in index.iter() {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let Ok(entry) = DesktopEntry::decode(path, &content) else {
                continue;
            };
            if entry.no_display() || entry.exec().is_none() {
                continue;
            }
            for mime in mime_types(&entry) {
                handlers.entry(mime).or_insert_with(|| id.clone());
            }
        }
        handlers
    }

    fn handler_for_mime(&mut self, mime: &str) -> Option<String> {
        let default = self.defaults().get(mime).cloned();
        if let Some(id) = default
            && self.entries().get(&id).is_some()
        {
            return Some(id);
        }
        self.handlers().get(mime).cloned()
    }
}

impl ProgramProvider for Associations {
    fn program_for_extension(&mut self, extension: &str) -> Option<ProgramKey> {
        let mime = self.globs().mime_for(extension)?.to_string();
        self.handler_for_mime(&mime).map(ProgramKey::new)
    }

    fn all_programs(&mut self) -> Vec<ProgramKey> {
        let index = self.entries.get_or_insert_with(DesktopIndex::load);
        let mut programs = Vec::new();
        for (id, path) in index.iter() {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let Ok(entry) = DesktopEntry::decode(path, &content) else {
                continue;
            };
            if entry.no_display() || entry.exec().is_none() {
                continue;
            }
            if mime_types(&entry).is_empty() {
                continue;
            }
            programs.push(ProgramKey::new(id.clone()));
        }
        logs::log_info(&format!(
            "Found {} desktop entries with file associations",
            programs.len()
        ));
        programs
    }

    fn display_name(&mut self, program: &ProgramKey) -> Option<String> {
        let path = self.entries().get(program.as_str())?.clone();
        let content = fs::read_to_string(&path).ok()?;
        let entry = DesktopEntry::decode(&path, &content).ok()?;
        entry.name(None).map(|name| name.to_string())
    }

    fn extensions(&mut self, program: &ProgramKey) -> Vec<String> {
        let Some(path) = self.entries().get(program.as_str()).cloned() else {
            return Vec::new();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        let mimes = match DesktopEntry::decode(&path, &content) {
            Ok(entry) => mime_types(&entry),
            Err(_) => return Vec::new(),
        };

        let globs = self.globs();
        let mut extensions = Vec::new();
        for mime in &mimes {
            for extension in globs.extensions_for(mime) {
                if !extensions.contains(extension) {
                    extensions.push(extension.clone());
                }
            }
        }
        extensions
    }

    fn icon(&mut self, program: &ProgramKey) -> Option<DynamicImage> {
        let path = self.entries().get(program.as_str())?.clone();
        let content = fs::read_to_string(&path).ok()?;
        let entry = DesktopEntry::decode(&path, &content).ok()?;
        let icon_name = entry.icon()?.to_string();

        let icon_path = resolve_icon_path(&icon_name)?;
        load_icon(&icon_path)
    }

    fn icon_size(&mut self) -> (u32, u32) {
        ICON_SIZE
    }

    fn open(&mut self, program: &ProgramKey, path: &Path) {
        let Some(entry_path) = self.entries().get(program.as_str()).cloned() else {
            logs::log_error(&format!("Unknown desktop entry: {}", program.as_str()));
            return;
        };
        let exec = fs::read_to_string(&entry_path).ok().and_then(|content| {
            DesktopEntry::decode(&entry_path, &content)
                .ok()
                .and_then(|entry| entry.exec().map(str::to_string))
        });
        let Some(exec) = exec else {
            logs::log_error(&format!("No Exec line in {}", program.as_str()));
            return;
        };

        let Some(mut command) = open_command(&exec, path) else {
            return;
        };
        if let Err(e) = command.spawn() {
            logs::log_error(&format!("Failed to launch {}: {}", program.as_str(), e));
        }
    }
}

/// Extension lookup tables parsed from shared-mime-info `globs2` (or the
/// older `globs`) files. Higher weights win; on equal weight the earlier
/// data directory wins, so user overrides shadow system entries.
#[derive(Default)]
struct Globs {
    by_extension: HashMap<String, (i32, String)>,
    by_mime: HashMap<String, Vec<String>>,
}

impl Globs {
    fn load() -> Self {
        let mut globs = Globs::default();
        for dir in data_dirs() {
            let content = fs::read_to_string(dir.join("mime/globs2"))
                .or_else(|_| fs::read_to_string(dir.join("mime/globs")));
            let Ok(content) = content else {
                continue;
            };
            for line in content.lines() {
                if let Some((weight, mime, pattern)) = parse_glob_line(line)
                    && let Some(extension) = pattern_extension(pattern)
                {
                    globs.add(weight, mime, extension);
                }
            }
        }
        logs::log_info(&format!(
            "Loaded {} extension globs",
            globs.by_extension.len()
        ));
        globs
    }

    fn add(&mut self, weight: i32, mime: &str, extension: String) {
        let slot = self
            .by_extension
            .entry(extension.clone())
            .or_insert((i32::MIN, String::new()));
        if weight > slot.0 {
            *slot = (weight, mime.to_string());
        }

        let extensions = self.by_mime.entry(mime.to_string()).or_default();
        if !extensions.contains(&extension) {
            extensions.push(extension);
        }
    }

    fn mime_for(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(extension)
            .map(|(_, mime)| mime.as_str())
    }

    fn extensions_for(&self, mime: &str) -> &[String] {
        self.by_mime.get(mime).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `weight:mime/type:pattern[:flags]` (globs2) or `mime/type:pattern`
/// (globs). Comments and blank lines yield nothing.
fn parse_glob_line(line: &str) -> Option<(i32, &str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(':').collect();
    match fields.as_slice() {
        [mime, pattern] => Some((50, *mime, *pattern)),
        [weight, mime, pattern, ..] => Some((weight.parse().ok()?, *mime, *pattern)),
        _ => None,
    }
}

/// Accept only literal `*.ext` patterns; anything with further wildcards
/// has no single extension to index under.
fn pattern_extension(pattern: &str) -> Option<String> {
    let suffix = pattern.strip_prefix("*.")?;
    if suffix.is_empty() || suffix.contains(['*', '?', '[', ']']) {
        return None;
    }
    Some(format!(".{}", suffix.to_ascii_lowercase()))
}

/// Desktop files addressable by id, earliest XDG data directory first.
#[derive(Default)]
struct DesktopIndex {
    order: Vec<String>,
    paths: HashMap<String, PathBuf>,
}

impl DesktopIndex {
    fn load() -> Self {
        let mut index = DesktopIndex::default();
        for path in Iter::new(default_paths()) {
            if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                continue;
            }
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            // First occurrence wins, matching XDG precedence.
            if !index.paths.contains_key(&id) {
                index.order.push(id.clone());
                index.paths.insert(id, path);
            }
        }
        index
    }

    fn get(&self, id: &str) -> Option<&PathBuf> {
        self.paths.get(id)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.order
            .iter()
            .filter_map(|id| self.paths.get(id).map(|path| (id, path)))
    }
}

fn load_defaults() -> HashMap<String, String> {
    let mut defaults = HashMap::new();
    for path in mimeapps_paths() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (mime, id) in parse_default_applications(&content) {
            defaults.entry(mime).or_insert(id);
        }
    }
    defaults
}

/// `[Default Applications]` pairs from a mimeapps.list, first listed
/// handler per MIME type.
fn parse_default_applications(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut in_defaults = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_defaults = line == "[Default Applications]";
        } else if in_defaults
            && let Some((mime, ids)) = line.split_once('=')
            && let Some(id) = ids.split(';').map(str::trim).find(|id| !id.is_empty())
        {
            pairs.push((mime.trim().to_string(), id.to_string()));
        }
    }
    pairs
}

fn mime_types(entry: &DesktopEntry) -> Vec<String> {
    entry
        .desktop_entry("MimeType")
        .map(|raw| {
            raw.split(';')
                .map(str::trim)
                .filter(|mime| !mime.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn data_dirs() -> Vec<PathBuf> {
    let mut dirs_list = Vec::new();
    if let Some(data_home) = dirs::data_dir() {
        dirs_list.push(data_home);
    }
    let system = std::env::var("XDG_DATA_DIRS")
        .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
    dirs_list.extend(system.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
    dirs_list
}

fn mimeapps_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config) = dirs::config_dir() {
        paths.push(config.join("mimeapps.list"));
    }
    paths.push(PathBuf::from("/etc/xdg/mimeapps.list"));
    for data in data_dirs() {
        paths.push(data.join("applications/mimeapps.list"));
        paths.push(data.join("applications/defaults.list"));
    }
    paths
}

fn resolve_icon_path(icon_name: &str) -> Option<PathBuf> {
    if icon_name.starts_with('/') {
        let path = PathBuf::from(icon_name);
        return path.exists().then_some(path);
    }

    let mut bases: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        bases.push(home.join(".icons"));
        bases.push(home.join(".local/share/icons"));
    }
    for data in data_dirs() {
        bases.push(data.join("icons"));
    }
    bases.push(PathBuf::from("/usr/share/pixmaps"));

    const FORMATS: [&str; 4] = ["png", "svg", "xpm", "ico"];
    for base in &bases {
        for size in ["48x48", "scalable", "64x64", "128x128"] {
            for format in FORMATS {
                let candidate = base.join(format!("hicolor/{size}/apps/{icon_name}.{format}"));
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        for format in FORMATS {
            let candidate = base.join(format!("{icon_name}.{format}"));
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn load_icon(path: &Path) -> Option<DynamicImage> {
    if path.extension().and_then(|e| e.to_str()) == Some("svg") {
        return rasterize_svg(path);
    }
    match image::open(path) {
        Ok(image) => Some(image),
        Err(e) => {
            logs::log_error(&format!("Failed to decode icon {}: {}", path.display(), e));
            None
        }
    }
}

fn rasterize_svg(path: &Path) -> Option<DynamicImage> {
    let data = fs::read(path).ok()?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default()).ok()?;
    let size = tree.size();
    let width = (size.width().ceil() as u32).max(1);
    let height = (size.height().ceil() as u32).max(1);

    let mut pixmap = tiny_skia::Pixmap::new(width, height)?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image::RgbaImage::from_raw(width, height, rgba).map(DynamicImage::ImageRgba8)
}

/// Turn a desktop entry `Exec=` line into a command opening one path.
/// The file and URL placeholders receive the path; other field codes are
/// dropped.
fn open_command(exec: &str, path: &Path) -> Option<Command> {
    let mut parts = exec.split_whitespace();
    let program = parts.next()?.trim_matches('"');

    let mut command = Command::new(program);
    let mut has_placeholder = false;
    for arg in parts {
        match arg {
            "%f" | "%F" | "%u" | "%U" => {
                command.arg(path);
                has_placeholder = true;
            }
            arg if arg.starts_with('%') => {}
            arg => {
                command.arg(arg.trim_matches('"'));
            }
        }
    }
    if !has_placeholder {
        command.arg(path);
    }
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn glob_lines_parse_both_formats() {
        assert_eq!(
            parse_glob_line("image/png:*.png"),
            Some((50, "image/png", "*.png"))
        );
        assert_eq!(
            parse_glob_line("55:text/x-makefile:*.mk"),
            Some((55, "text/x-makefile", "*.mk"))
        );
        assert_eq!(
            parse_glob_line("50:application/x-perl:*.pl:cs"),
            Some((50, "application/x-perl", "*.pl"))
        );
        assert_eq!(parse_glob_line("# comment"), None);
        assert_eq!(parse_glob_line(""), None);
        assert_eq!(parse_glob_line("just-one-field"), None);
    }

    #[test]
    fn only_literal_extension_patterns_index() {
        assert_eq!(pattern_extension("*.png").as_deref(), Some(".png"));
        assert_eq!(pattern_extension("*.PNG").as_deref(), Some(".png"));
        assert_eq!(pattern_extension("*.tar.gz").as_deref(), Some(".tar.gz"));
        assert_eq!(pattern_extension("*.[ch]"), None);
        assert_eq!(pattern_extension("Makefile"), None);
        assert_eq!(pattern_extension("*."), None);
    }

    #[test]
    fn heavier_globs_win_earlier_dirs_break_ties() {
        let mut globs = Globs::default();
        globs.add(50, "image/png", ".png".to_string());
        globs.add(60, "image/x-apng", ".png".to_string());
        globs.add(60, "image/late", ".png".to_string());
        assert_eq!(globs.mime_for(".png"), Some("image/x-apng"));
        assert_eq!(globs.extensions_for("image/png"), &[".png".to_string()][..]);
    }

    #[test]
    fn default_applications_section_is_parsed() {
        let content = "\
[Added Associations]
image/png=shotwell.desktop;

[Default Applications]
image/png=org.gnome.eog.desktop;gimp.desktop
application/pdf= ;org.gnome.Evince.desktop;
";
        assert_eq!(
            parse_default_applications(content),
            vec![
                ("image/png".to_string(), "org.gnome.eog.desktop".to_string()),
                (
                    "application/pdf".to_string(),
                    "org.gnome.Evince.desktop".to_string()
                ),
            ]
        );
    }

    #[test]
    fn exec_placeholders_receive_the_path() {
        let command = open_command("eog %U", Path::new("/tmp/a.png")).unwrap();
        assert_eq!(command.get_program(), OsStr::new("eog"));
        let args: Vec<&OsStr> = command.get_args().collect();
        assert_eq!(args, vec![OsStr::new("/tmp/a.png")]);
    }

    #[test]
    fn exec_without_placeholder_appends_the_path() {
        let command = open_command("gimp -n --icon %i", Path::new("/tmp/a.xcf")).unwrap();
        let args: Vec<&OsStr> = command.get_args().collect();
        assert_eq!(
            args,
            vec![
                OsStr::new("-n"),
                OsStr::new("--icon"),
                OsStr::new("/tmp/a.xcf"),
            ]
        );
    }
}
