use std::path::{Path, PathBuf};

use image::DynamicImage;
use windows::Win32::UI::Shell::ShellExecuteW;
use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;
use windows::core::{HSTRING, PCWSTR, w};
use winreg::{RegKey, enums::*};

use crate::logs;
use crate::provider::{ProgramKey, ProgramProvider};

const ICON_SIZE: (u32, u32) = (32, 32);

/// File associations from the registry: `HKEY_CLASSES_ROOT\.ext` names a
/// ProgID, the ProgID key carries the friendly name and `DefaultIcon`.
/// Program keys are ProgIDs such as `"Acrobat.Document.DC"`.
pub struct Associations {
    // ext -> ProgID pairs in registry enumeration order, built on the
    // first call that needs the full table.
    table: Option<Vec<(String, String)>>,
}

impl Associations {
    pub fn new() -> Self {
        Self { table: None }
    }

    fn classes_root() -> RegKey {
        RegKey::predef(HKEY_CLASSES_ROOT)
    }

    fn table(&mut self) -> &[(String, String)] {
        self.table.get_or_insert_with(load_association_table)
    }
}

impl ProgramProvider for Associations {
    fn program_for_extension(&mut self, extension: &str) -> Option<ProgramKey> {
        let progid = Self::classes_root()
            .open_subkey(extension)
            .ok()?
            .get_value::<String, _>("")
            .ok()?;
        if progid.is_empty() {
            return None;
        }
        Some(ProgramKey::new(progid))
    }

    fn all_programs(&mut self) -> Vec<ProgramKey> {
        let mut programs = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (_, progid) in self.table() {
            if seen.insert(progid.clone()) {
                programs.push(ProgramKey::new(progid.clone()));
            }
        }
        logs::log_info(&format!("Found {} registered ProgIDs", programs.len()));
        programs
    }

    fn display_name(&mut self, program: &ProgramKey) -> Option<String> {
        Self::classes_root()
            .open_subkey(program.as_str())
            .ok()?
            .get_value::<String, _>("")
            .ok()
            .filter(|name| !name.is_empty())
    }

    fn extensions(&mut self, program: &ProgramKey) -> Vec<String> {
        self.table()
            .iter()
            .filter(|(_, progid)| progid == program.as_str())
            .map(|(extension, _)| extension.clone())
            .collect()
    }

    fn icon(&mut self, program: &ProgramKey) -> Option<DynamicImage> {
        let resource = Self::classes_root()
            .open_subkey(format!("{}\\DefaultIcon", program.as_str()))
            .ok()?
            .get_value::<String, _>("")
            .ok()?;
        let path = icon_resource_path(&resource)?;

        match image::open(&path) {
            Ok(image) => Some(image),
            Err(e) => {
                logs::log_error(&format!("Failed to decode icon {}: {}", path.display(), e));
                None
            }
        }
    }

    fn icon_size(&mut self) -> (u32, u32) {
        ICON_SIZE
    }

    fn open(&mut self, _program: &ProgramKey, path: &Path) {
        // The shell resolves the association itself; the key that led
        // here is the program it will pick.
        let file = HSTRING::from(path.as_os_str());
        // SAFETY: every pointer argument is null or backed by a wide
        // string that outlives the call.
        let result = unsafe {
            ShellExecuteW(
                None,
                w!("open"),
                &file,
                PCWSTR::null(),
                PCWSTR::null(),
                SW_SHOWNORMAL,
            )
        };
        if result.0 as usize <= 32 {
            logs::log_error(&format!("ShellExecuteW failed for {}", path.display()));
        }
    }
}

/// Walk every `HKCR\.ext` key and record its ProgID.
fn load_association_table() -> Vec<(String, String)> {
    let root = RegKey::predef(HKEY_CLASSES_ROOT);
    let mut table = Vec::new();
    for name in root.enum_keys().filter_map(Result::ok) {
        if !name.starts_with('.') {
            continue;
        }
        let Ok(key) = root.open_subkey(&name) else {
            continue;
        };
        let Ok(progid) = key.get_value::<String, _>("") else {
            continue;
        };
        if !progid.is_empty() {
            table.push((name.to_ascii_lowercase(), progid));
        }
    }
    logs::log_info(&format!("Indexed {} extension associations", table.len()));
    table
}

/// `DefaultIcon` values look like `C:\path\app.ico,0`, sometimes quoted.
/// Only file formats `image` can decode are worth returning; icons baked
/// into executables fall through to the placeholder.
fn icon_resource_path(resource: &str) -> Option<PathBuf> {
    let resource = resource.trim().trim_matches('"');
    let path_part = match resource.rsplit_once(',') {
        Some((path, index)) if index.trim().parse::<i32>().is_ok() => path,
        _ => resource,
    };
    let path = PathBuf::from(path_part.trim().trim_matches('"'));

    let decodable = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("ico")
            || ext.eq_ignore_ascii_case("png")
            || ext.eq_ignore_ascii_case("bmp")
    );
    (decodable && path.exists()).then_some(path)
}
