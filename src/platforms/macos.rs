use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

use icns::{IconFamily, IconType};
use image::DynamicImage;
use plist::Value;

use crate::logs;
use crate::provider::{ProgramKey, ProgramProvider};

const ICON_SIZE: (u32, u32) = (64, 64);

/// File associations from application bundles: each bundle's Info.plist
/// lists the extensions it handles under `CFBundleDocumentTypes`.
/// Program keys are bundle paths such as `"/Applications/Preview.app"`.
pub struct Associations {
    bundles: Option<Vec<Bundle>>,
}

struct Bundle {
    path: PathBuf,
    name: String,
    extensions: Vec<String>,
}

impl Associations {
    pub fn new() -> Self {
        Self { bundles: None }
    }

    fn bundles(&mut self) -> &[Bundle] {
        self.bundles.get_or_insert_with(scan_bundles)
    }

    fn bundle(&mut self, program: &ProgramKey) -> Option<&Bundle> {
        self.bundles()
            .iter()
            .find(|bundle| bundle.path.as_os_str() == program.as_str())
    }
}

impl ProgramProvider for Associations {
    fn program_for_extension(&mut self, extension: &str) -> Option<ProgramKey> {
        self.bundles()
            .iter()
            .find(|bundle| bundle.extensions.iter().any(|e| e == extension))
            .map(|bundle| ProgramKey::new(bundle.path.to_string_lossy()))
    }

    fn all_programs(&mut self) -> Vec<ProgramKey> {
        self.bundles()
            .iter()
            .filter(|bundle| !bundle.extensions.is_empty())
            .map(|bundle| ProgramKey::new(bundle.path.to_string_lossy()))
            .collect()
    }

    fn display_name(&mut self, program: &ProgramKey) -> Option<String> {
        self.bundle(program).map(|bundle| bundle.name.clone())
    }

    fn extensions(&mut self, program: &ProgramKey) -> Vec<String> {
        self.bundle(program)
            .map(|bundle| bundle.extensions.clone())
            .unwrap_or_default()
    }

    fn icon(&mut self, program: &ProgramKey) -> Option<DynamicImage> {
        let (bundle_path, name) = {
            let bundle = self.bundle(program)?;
            (bundle.path.clone(), bundle.name.clone())
        };
        let icon_path = find_icns_icon(&bundle_path, &name)?;
        extract_icns(&icon_path)
    }

    fn icon_size(&mut self) -> (u32, u32) {
        ICON_SIZE
    }

    fn open(&mut self, program: &ProgramKey, path: &Path) {
        let result = Command::new("open")
            .arg("-a")
            .arg(program.as_str())
            .arg(path)
            .spawn();
        if let Err(e) = result {
            logs::log_error(&format!("Failed to launch {}: {}", program.as_str(), e));
        }
    }
}

fn app_directories() -> impl Iterator<Item = String> {
    [
        "/Applications".to_string(),
        "/Applications/Utilities".to_string(),
        "/System/Applications".to_string(),
        "/System/Applications/Utilities".to_string(),
    ]
    .into_iter()
    .chain(
        std::env::var("HOME")
            .ok()
            .map(|home| format!("{}/Applications", home)),
    )
}

fn scan_bundles() -> Vec<Bundle> {
    let bundles: Vec<Bundle> = app_directories()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(Result::ok))
        .filter(|entry| entry.path().extension() == Some(std::ffi::OsStr::new("app")))
        .filter_map(|entry| parse_bundle(&entry.path()))
        .collect();
    logs::log_info(&format!(
        "Found {} application bundles with document types",
        bundles.iter().filter(|b| !b.extensions.is_empty()).count()
    ));
    bundles
}

fn parse_bundle(app_path: &Path) -> Option<Bundle> {
    let plist_path = app_path.join("Contents/Info.plist");
    let file = File::open(&plist_path).ok()?;
    let info: Value = plist::from_reader(file).ok()?;
    let dict = info.as_dictionary()?;

    // The bundle filename is the app name.
    let name = app_path
        .file_name()?
        .to_string_lossy()
        .trim_end_matches(".app")
        .to_owned();

    Some(Bundle {
        path: app_path.to_path_buf(),
        name,
        extensions: document_extensions(dict),
    })
}

/// Extensions declared under `CFBundleDocumentTypes`, normalized to the
/// lowercase dotted form the registry keys on.
fn document_extensions(info: &plist::Dictionary) -> Vec<String> {
    let mut extensions = Vec::new();
    let Some(types) = info.get("CFBundleDocumentTypes").and_then(Value::as_array) else {
        return extensions;
    };
    for doc_type in types {
        let declared = doc_type
            .as_dictionary()
            .and_then(|d| d.get("CFBundleTypeExtensions"))
            .and_then(Value::as_array);
        let Some(declared) = declared else {
            continue;
        };
        for ext in declared.iter().filter_map(Value::as_string) {
            if ext == "*" {
                continue;
            }
            let normalized = format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase());
            if !extensions.contains(&normalized) {
                extensions.push(normalized);
            }
        }
    }
    extensions
}

fn find_icns_icon(app_path: &Path, app_name: &str) -> Option<PathBuf> {
    let resources_dir = app_path.join("Contents/Resources");

    // Try filename patterns first, then the plist as last resort
    find_icon_by_patterns(&resources_dir, app_name)
        .or_else(|| icon_from_plist(app_path, &resources_dir))
}

fn validate_icns_path(path: &PathBuf) -> bool {
    path.exists()
        && path.metadata().ok().map(|m| m.len() > 0).unwrap_or(false)
        && File::open(path)
            .ok()
            .and_then(|f| IconFamily::read(BufReader::new(f)).ok())
            .is_some()
}

fn find_icon_by_patterns(resources_dir: &Path, app_name: &str) -> Option<PathBuf> {
    let icon_patterns = [
        format!("{}.icns", app_name),
        format!("{}.icns", app_name.to_lowercase()),
        format!("{}.icns", app_name.to_uppercase()),
        "AppIcon.icns".to_string(),
        "appicon.icns".to_string(),
        "app.icns".to_string(),
        "icon.icns".to_string(),
    ];

    icon_patterns
        .iter()
        .map(|pattern| resources_dir.join(pattern))
        .find(validate_icns_path)
}

fn icon_from_plist(app_path: &Path, resources_dir: &Path) -> Option<PathBuf> {
    let plist_path = app_path.join("Contents/Info.plist");
    let file = File::open(&plist_path).ok()?;
    let plist: Value = plist::from_reader(file).ok()?;
    let dict = plist.as_dictionary()?;

    ["CFBundleIconName", "CFBundleIconFile"]
        .iter()
        .find_map(|&key| {
            let icon_name = dict.get(key)?.as_string()?;
            let icon_filename = if icon_name.ends_with(".icns") {
                icon_name.to_string()
            } else {
                format!("{}.icns", icon_name)
            };
            let icon_path = resources_dir.join(&icon_filename);
            validate_icns_path(&icon_path).then_some(icon_path)
        })
}

fn extract_icns(icon_path: &Path) -> Option<DynamicImage> {
    let file = File::open(icon_path).ok()?;
    let icon_family = IconFamily::read(BufReader::new(file)).ok()?;

    let icon = [
        IconType::RGBA32_256x256,
        IconType::RGBA32_128x128,
        IconType::RGBA32_64x64,
        IconType::RGB24_48x48,
        IconType::RGB24_32x32,
        // last resort, large enough to slow scaling down
        IconType::RGBA32_512x512,
    ]
    .iter()
    .find_map(|&icon_type| icon_family.get_icon_with_type(icon_type).ok())?;

    let mut png_data = Vec::new();
    icon.write_png(&mut png_data).ok()?;
    image::load_from_memory(&png_data).ok()
}
