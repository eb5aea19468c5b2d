//! Default locations for loopmix files

use std::path::PathBuf;

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "loopmix.yaml";

/// `$XDG_CONFIG_HOME/loopmix` (or the platform equivalent)
///
/// Falls back to `./loopmix` when the platform has no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopmix")
}

/// Full path of the engine config file
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("loopmix/loopmix.yaml"));
    }
}
