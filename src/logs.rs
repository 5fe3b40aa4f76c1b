use std::fs::metadata;
use std::io::Write;
use std::path::PathBuf;

pub fn log_info(msg: &str) {
    write_log("INFO", msg);
}

pub fn log_error(msg: &str) {
    write_log("ERROR", msg);
}

fn write_log(level: &str, msg: &str) {
    let log_file = match get_log_file() {
        Ok(path) => path,
        Err(_) => return,
    };

    if let Some(parent) = log_file.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return;
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let log_entry = format!("[{}] {}: {}\n", timestamp, level, msg);

    // Write the log entry
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .and_then(|mut file| file.write_all(log_entry.as_bytes()));

    // Check file size and warn if over 5 MiB (simple check, no mutex needed)
    if let Ok(size) = metadata(&log_file).map(|m| m.len()) {
        if size > 5 * 1024 * 1024 {
            let warning = format!(
                "[{}] WARN: Log file is {:.1} MiB. Consider clearing it\n",
                timestamp,
                size as f64 / 1_048_576.0
            );
            let _ = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .and_then(|mut file| file.write_all(warning.as_bytes()));
        }
    }
}

fn get_log_file() -> Result<PathBuf, std::env::VarError> {
    #[cfg(target_os = "windows")]
    let base = std::env::var("APPDATA")?;

    #[cfg(target_os = "macos")]
    let base = format!("{}/Library/Logs", std::env::var("HOME")?);

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let base = std::env::var("XDG_DATA_HOME")
        .or_else(|_| std::env::var("HOME").map(|home| format!("{}/.local/share", home)))?;

    Ok(PathBuf::from(base).join("openwith").join("openwith.log"))
}
