//! Pre-shared-key header authentication.

use axum::http::HeaderMap;

use crate::config::AuthConfig;

#[derive(Clone)]
pub struct PskAuth {
    psk: String,
    header: String,
}

impl PskAuth {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            psk: config.psk.clone(),
            header: config.header.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.psk.is_empty()
    }

    /// True when auth is disabled or the header carries the exact key.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        if !self.is_enabled() {
            return true;
        }
        headers
            .get(self.header.as_str())
            .is_some_and(|value| constant_time_eq(value.as_bytes(), self.psk.as_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
