use std::path::Path;

use tracing::debug;

/// Socket the rendering server listens on when nothing else is configured.
pub const DEFAULT_SOCKET_NAME: &str = "/tmp/.virgl_test";

/// Renderer name announced to the host when the process name is unknown.
pub const FALLBACK_RENDERER_NAME: &str = "venus";

/// Returns the default socket path for the rendering server.
pub fn default_socket_path() -> String {
    DEFAULT_SOCKET_NAME.to_string()
}

/// Short name of the running process (the file name of `argv[0]`).
pub fn process_name() -> Option<String> {
    let arg0 = std::env::args_os().next()?;
    let name = Path::new(&arg0).file_name()?.to_string_lossy().into_owned();
    if name.is_empty() {
        debug!("argv[0] has no file name");
        return None;
    }
    Some(name)
}

/// Name the client announces itself with: the process name, or the fallback.
pub fn renderer_name() -> String {
    process_name().unwrap_or_else(|| FALLBACK_RENDERER_NAME.to_string())
}
