//! Typed agent configuration (`agent.toml`).

use std::path::PathBuf;

use robotik_types::{ConfigError, ThetaClamps, default_theta_clamps};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub optimizer: OptimizerConfig,
    pub theta_clamps: ThetaClamps,
    pub chess: ChessConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            optimizer: OptimizerConfig::default(),
            theta_clamps: default_theta_clamps(),
            chess: ChessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Pre-shared-key settings. An empty `psk` disables authentication.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub psk: String,
    pub header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            psk: String::new(),
            header: "X-PSK".to_string(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("psk", if self.psk.is_empty() { &"<not set>" } else { &"<redacted>" })
            .field("header", &self.header)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/agent.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Initial search spread for a new context.
    pub sigma: f64,
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub seed: u64,
    /// Aggregate trials in a context before the best theta is exploited.
    pub exploit_after: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            sigma: 0.6,
            min_sigma: 0.1,
            max_sigma: 1.5,
            seed: 123,
            exploit_after: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChessMode {
    /// Ask the online service, fall back to the local engine.
    #[serde(alias = "online")]
    OnlineFirst,
    Stockfish,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChessConfig {
    pub mode: ChessMode,
    pub online_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub online_token: String,
    pub stockfish_path: PathBuf,
    pub movetime_ms: u64,
    pub timeout_s: f64,
}

impl Default for ChessConfig {
    fn default() -> Self {
        Self {
            mode: ChessMode::OnlineFirst,
            online_url: String::new(),
            online_token: String::new(),
            stockfish_path: PathBuf::from("stockfish"),
            movetime_ms: 1000,
            timeout_s: 5.0,
        }
    }
}

impl std::fmt::Debug for ChessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token: &dyn std::fmt::Debug = if self.online_token.is_empty() {
            &"<not set>"
        } else {
            &"<redacted>"
        };
        f.debug_struct("ChessConfig")
            .field("mode", &self.mode)
            .field("online_url", &self.online_url)
            .field("online_token", token)
            .field("stockfish_path", &self.stockfish_path)
            .field("movetime_ms", &self.movetime_ms)
            .field("timeout_s", &self.timeout_s)
            .finish()
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "server.bind",
                format!("not a socket address: {:?}", self.server.bind),
            ));
        }
        if self.auth.header.parse::<axum::http::HeaderName>().is_err() {
            return Err(ConfigError::invalid("auth.header", "not a valid header name"));
        }
        let o = &self.optimizer;
        let ordered = o.min_sigma > 0.0 && o.min_sigma <= o.sigma && o.sigma <= o.max_sigma;
        if !(ordered && o.max_sigma.is_finite()) {
            return Err(ConfigError::invalid(
                "optimizer",
                "require 0 < min_sigma <= sigma <= max_sigma",
            ));
        }
        for (field, bounds) in &self.theta_clamps {
            bounds.validate(&format!("theta_clamps.{field}"))?;
        }
        if !(self.chess.timeout_s.is_finite() && self.chess.timeout_s > 0.0) {
            return Err(ConfigError::invalid("chess.timeout_s", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn legacy_online_mode_is_accepted() {
        let cfg: AgentConfig = toml::from_str("[chess]\nmode = \"online\"\n").unwrap();
        assert_eq!(cfg.chess.mode, ChessMode::OnlineFirst);
        assert_eq!(cfg.optimizer.exploit_after, 10);
    }

    #[test]
    fn sigma_ordering_is_enforced() {
        let mut cfg = AgentConfig::default();
        cfg.optimizer.min_sigma = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AgentConfig::default();
        cfg.optimizer.sigma = 2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_sections_fail_to_parse() {
        assert!(toml::from_str::<AgentConfig>("[optimizer]\npopulation = 8\n").is_err());
    }

    #[test]
    fn secrets_are_redacted() {
        let mut cfg = AgentConfig::default();
        cfg.auth.psk = "topsecret".into();
        cfg.chess.online_token = "tok-123".into();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("topsecret"));
        assert!(!dbg.contains("tok-123"));
    }
}
