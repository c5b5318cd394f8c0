//! Config files for the edge and agent: TOML on disk, environment overrides
//! on top, validation before use.

use std::fs;
use std::path::Path;

use robotik_agent::AgentConfig;
use robotik_runtime::EdgeConfig;
use robotik_types::ConfigError;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const DEFAULT_EDGE_CONFIG: &str = "config/edge.toml";
pub const DEFAULT_AGENT_CONFIG: &str = "config/agent.toml";

/// Parse `path`, or return defaults when the file does not exist.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load, apply `ROBOTIK_*` overrides and validate the edge config.
///
/// | Variable | Field |
/// |---|---|
/// | `ROBOTIK_SERIAL_PORT` | `serial.port` |
/// | `ROBOTIK_AGENT_URL` | `agent.base_url` |
/// | `ROBOTIK_AGENT_PSK` | `agent.psk` |
pub fn load_edge(path: &Path) -> Result<EdgeConfig, ConfigError> {
    let mut cfg: EdgeConfig = load_or_default(path)?;
    apply_edge_env(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn apply_edge_env(cfg: &mut EdgeConfig) {
    if let Ok(v) = std::env::var("ROBOTIK_SERIAL_PORT") {
        cfg.serial.port = v;
    }
    if let Ok(v) = std::env::var("ROBOTIK_AGENT_URL") {
        cfg.agent.base_url = v;
    }
    if let Ok(v) = std::env::var("ROBOTIK_AGENT_PSK") {
        cfg.agent.psk = v;
    }
}

/// Load, apply `ROBOTIK_*` overrides and validate the agent config.
///
/// | Variable | Field |
/// |---|---|
/// | `ROBOTIK_AGENT_PSK` | `auth.psk` |
/// | `ROBOTIK_DB_PATH` | `database.path` |
/// | `ROBOTIK_BIND` | `server.bind` |
pub fn load_agent(path: &Path) -> Result<AgentConfig, ConfigError> {
    let mut cfg: AgentConfig = load_or_default(path)?;
    apply_agent_env(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn apply_agent_env(cfg: &mut AgentConfig) {
    if let Ok(v) = std::env::var("ROBOTIK_AGENT_PSK") {
        cfg.auth.psk = v;
    }
    if let Ok(v) = std::env::var("ROBOTIK_DB_PATH") {
        cfg.database.path = v.into();
    }
    if let Ok(v) = std::env::var("ROBOTIK_BIND") {
        cfg.server.bind = v;
    }
}

/// Write `cfg` as TOML, owner-only on Unix since it may hold a PSK.
pub fn save_to<T: Serialize>(cfg: &T, path: &Path) -> Result<(), ConfigError> {
    let write_err = |message: String| ConfigError::Write {
        path: path.display().to_string(),
        message,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| write_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| write_err(e.to_string()))?;
        // An existing file keeps its old mode; tighten it.
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| write_err(e.to_string()))?;
        file.write_all(raw.as_bytes())
            .map_err(|e| write_err(e.to_string()))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| write_err(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: EdgeConfig = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, EdgeConfig::default());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.toml");
        fs::write(&path, "[serial]\nbogus = 1\n").unwrap();
        let err = load_or_default::<EdgeConfig>(&path).unwrap_err();
        assert!(err.to_string().contains("edge.toml"));
    }

    #[test]
    fn saved_edge_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("edge.toml");
        let mut cfg = EdgeConfig::default();
        cfg.calibration.robot_board.h8 = [301.5, 299.0];
        save_to(&cfg, &path).unwrap();
        let back: EdgeConfig = load_or_default(&path).unwrap();
        assert_eq!(back, cfg);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        save_to(&AgentConfig::default(), &path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: the only test in this crate that touches these variables.
        unsafe {
            std::env::set_var("ROBOTIK_SERIAL_PORT", "/dev/ttyACM3");
            std::env::set_var("ROBOTIK_AGENT_PSK", "from-env");
            std::env::set_var("ROBOTIK_BIND", "127.0.0.1:9100");
        }
        let mut edge = EdgeConfig::default();
        apply_edge_env(&mut edge);
        let mut agent = AgentConfig::default();
        apply_agent_env(&mut agent);
        unsafe {
            std::env::remove_var("ROBOTIK_SERIAL_PORT");
            std::env::remove_var("ROBOTIK_AGENT_PSK");
            std::env::remove_var("ROBOTIK_BIND");
        }
        assert_eq!(edge.serial.port, "/dev/ttyACM3");
        assert_eq!(edge.agent.psk, "from-env");
        assert_eq!(agent.auth.psk, "from-env");
        assert_eq!(agent.server.bind, "127.0.0.1:9100");
        agent.validate().unwrap();
    }
}
