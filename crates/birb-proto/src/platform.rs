use std::path::PathBuf;

/// Loopback host the proxy subprocess serves on.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/birbwatch/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("birbwatch")
    }
    #[cfg(windows)]
    {
        // Portable data directory beside the executable wins
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_data = exe_dir.join("data");
                if portable_data.exists() {
                    return portable_data;
                }
            }
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("birbwatch")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_config = exe_dir.join("config.toml");
                if portable_config.exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    // On macOS and Linux, always use ~/.config/birbwatch/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("birbwatch")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("birbwatch")
    }
}

/// Base URL the proxy subprocess serves the stream on.
pub fn proxy_url(port: u16) -> String {
    format!("http://{}:{}/", LOOPBACK_HOST, port)
}

#[cfg(unix)]
fn streamlink_binary_names() -> &'static [&'static str] {
    &["streamlink"]
}

#[cfg(windows)]
fn streamlink_binary_names() -> &'static [&'static str] {
    &["streamlink.exe", "streamlink"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the streamlink binary used both as resolver and as proxy.
///
/// Searches in order:
/// 1. STREAMLINK_PATH environment variable
/// 2. Beside current executable (or its `external/` folder)
/// 3. PATH
pub fn find_streamlink_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("STREAMLINK_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(p) = find_beside_exe(streamlink_binary_names()) {
        return Some(p);
    }

    find_on_path(streamlink_binary_names())
}
