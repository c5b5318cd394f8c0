//! Blocking HTTP client for the learning agent.
//!
//! The edge loop is synchronous, so the client uses `reqwest::blocking`. The
//! [`LearningAgent`] trait is the seam the orchestrator talks through; tests
//! plug in an in-memory agent.

use std::time::Duration;

use robotik_types::{Context, NextThetaResponse, ReportRequest, StatusResponse};
use thiserror::Error;
use tracing::debug;

use crate::config::AgentClientConfig;

#[derive(Error, Debug)]
pub enum AgentClientError {
    /// Transport failure or non-2xx status.
    #[error("agent HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The learning service as seen from the edge.
pub trait LearningAgent: Send {
    /// Parameters to try next for `context`.
    fn next_theta(&mut self, context: &Context) -> Result<NextThetaResponse, AgentClientError>;

    /// Record the outcome of one trial.
    fn report(&mut self, report: &ReportRequest) -> Result<(), AgentClientError>;
}

pub struct AgentClient {
    base_url: String,
    psk: String,
    psk_header: String,
    client: reqwest::blocking::Client,
}

impl AgentClient {
    pub fn new(config: &AgentClientConfig) -> Result<Self, AgentClientError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_s))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            psk: config.psk.clone(),
            psk_header: config.psk_header.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        if self.psk.is_empty() {
            req
        } else {
            req.header(self.psk_header.as_str(), self.psk.as_str())
        }
    }

    pub fn health(&self) -> Result<StatusResponse, AgentClientError> {
        let status = self
            .authed(self.client.get(self.url("/v1/health")))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(status)
    }
}

impl LearningAgent for AgentClient {
    fn next_theta(&mut self, context: &Context) -> Result<NextThetaResponse, AgentClientError> {
        let key = context.canonical_key();
        debug!(context = %key, "requesting next theta");
        let next = self
            .authed(self.client.get(self.url("/v1/learn/next")))
            .query(&[("context", key.as_str())])
            .send()?
            .error_for_status()?
            .json()?;
        Ok(next)
    }

    fn report(&mut self, report: &ReportRequest) -> Result<(), AgentClientError> {
        self.authed(self.client.post(self.url("/v1/learn/report")))
            .json(report)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Serve one canned response and hand back the request head.
    fn one_shot(status: &str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let status = status.to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            write!(
                stream,
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            head
        });
        (base, handle)
    }

    fn client(base: &str, psk: &str) -> AgentClient {
        AgentClient::new(&AgentClientConfig {
            base_url: format!("{base}/"),
            psk: psk.into(),
            timeout_s: 5.0,
            ..AgentClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn next_theta_sends_psk_and_context() {
        let (base, server) = one_shot(
            "200 OK",
            r#"{"theta_id":"t-1","theta":{"dx_mm":0.5},"skill":"pick","source":"sampled"}"#,
        );
        let mut c = client(&base, "s3cret");
        let context = Context::for_square("a2".parse().unwrap());
        let next = c.next_theta(&context).unwrap();
        assert_eq!(next.theta_id, "t-1");
        assert_eq!(next.theta.dx_mm, 0.5);
        assert_eq!(next.theta.v_lift, 1500.0);

        let head = server.join().unwrap().to_lowercase();
        assert!(head.starts_with("get /v1/learn/next?context="));
        assert!(head.contains("x-psk: s3cret"));
    }

    #[test]
    fn unauthorized_is_an_error() {
        let (base, server) = one_shot("401 Unauthorized", r#"{"detail":"unauthorized"}"#);
        let mut c = client(&base, "");
        let err = c.next_theta(&Context::default()).unwrap_err();
        let AgentClientError::Http(inner) = err;
        assert_eq!(inner.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
        let head = server.join().unwrap().to_lowercase();
        assert!(!head.contains("x-psk"));
    }
}
