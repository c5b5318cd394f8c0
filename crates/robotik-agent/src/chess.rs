//! Chess move passthrough: an online move service first, a local UCI engine
//! as fallback. No move generation happens here.

use std::process::Stdio;
use std::time::Duration;

use robotik_types::ChessSource;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::{ChessConfig, ChessMode};

#[derive(Error, Debug)]
pub enum ChessError {
    #[error("online move service: {0}")]
    Online(#[from] reqwest::Error),
    #[error("online move service returned no move")]
    NoMove,
    #[error("engine I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("engine: {0}")]
    Engine(String),
}

pub struct ChessEngine {
    config: ChessConfig,
    client: reqwest::Client,
}

impl ChessEngine {
    pub fn new(config: ChessConfig) -> Result<Self, ChessError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_s))
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn best_move(&self, fen: &str) -> Result<(String, ChessSource), ChessError> {
        if self.config.mode == ChessMode::OnlineFirst && !self.config.online_url.is_empty() {
            match self.online_move(fen).await {
                Ok(uci) => return Ok((uci, ChessSource::Online)),
                Err(e) => warn!(error = %e, "online move failed, using local engine"),
            }
        }
        let uci = self.engine_move(fen).await?;
        Ok((uci, ChessSource::Stockfish))
    }

    async fn online_move(&self, fen: &str) -> Result<String, ChessError> {
        let mut req = self.client.post(&self.config.online_url).json(&json!({ "fen": fen }));
        if !self.config.online_token.is_empty() {
            req = req.bearer_auth(&self.config.online_token);
        }
        let body: Value = req.send().await?.error_for_status()?.json().await?;
        ["uci", "move", "bestmove"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .ok_or(ChessError::NoMove)
    }

    async fn engine_move(&self, fen: &str) -> Result<String, ChessError> {
        let mut child = Command::new(&self.config.stockfish_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChessError::Engine("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChessError::Engine("no stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let handshake = Duration::from_secs(2);

        send(&mut stdin, "uci").await?;
        wait_for(&mut lines, "uciok", handshake).await?;
        send(&mut stdin, "isready").await?;
        wait_for(&mut lines, "readyok", handshake).await?;
        send(&mut stdin, &format!("position fen {fen}")).await?;
        send(&mut stdin, &format!("go movetime {}", self.config.movetime_ms)).await?;
        let search = Duration::from_millis(self.config.movetime_ms) + handshake;
        let line = wait_for(&mut lines, "bestmove", search).await?;

        let _ = send(&mut stdin, "quit").await;
        let _ = child.kill().await;

        let uci = line
            .split_whitespace()
            .nth(1)
            .filter(|m| *m != "(none)")
            .ok_or_else(|| ChessError::Engine(format!("no move in {line:?}")))?;
        info!(uci, "engine move");
        Ok(uci.to_string())
    }
}

async fn send(stdin: &mut ChildStdin, cmd: &str) -> Result<(), ChessError> {
    stdin.write_all(cmd.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Read lines until one starts with `token`.
async fn wait_for(
    lines: &mut Lines<BufReader<ChildStdout>>,
    token: &'static str,
    limit: Duration,
) -> Result<String, ChessError> {
    let read = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim_start().starts_with(token) {
                return Ok(line);
            }
        }
        Err::<String, ChessError>(ChessError::Engine(format!("engine exited before {token}")))
    };
    tokio::time::timeout(limit, read)
        .await
        .map_err(|_| ChessError::Timeout(token))?
}
