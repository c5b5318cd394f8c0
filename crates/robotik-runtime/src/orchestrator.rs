//! [`EdgeCore`] – the edge skill orchestrator.
//!
//! Owns the motion driver, gripper, cameras and trial logger for the whole
//! process and runs skills under the recovery policy:
//!
//! - theta is clamped before use;
//! - retryable failures are re-attempted up to `recovery.retries` times;
//! - a controller alarm triggers unlock (and optional homing) and ends the
//!   execution with `GRBL_ALARM`;
//! - every other failure ends the execution immediately.

use std::time::Duration;

use robotik_hal::{Camera, CameraRig, Gripper, MotionDriver, SerialLink, SnapshotCamera};
use robotik_kernel::clamp_theta;
use robotik_memory::{LoggerError, TrialLogger};
use robotik_perception::{MarkerDetector, NoMarkers, Verifier};
use robotik_types::{
    Context, Fault, ReportRequest, SkillOutcome, Square, TerminalFailure, Theta, TrialRecord,
};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::agent_client::{AgentClient, AgentClientError, LearningAgent};
use crate::config::EdgeConfig;
use crate::observer::BoardObserver;
use crate::skills::{Skill, SkillContext};

#[derive(Error, Debug)]
pub enum EdgeError {
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    Agent(#[from] AgentClientError),
    #[error(transparent)]
    Logger(#[from] LoggerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Idle,
    Connected,
    Executing,
}

pub struct EdgeCore {
    config: EdgeConfig,
    driver: MotionDriver,
    gripper: Gripper,
    observer: BoardObserver,
    logger: TrialLogger,
    agent: Option<Box<dyn LearningAgent>>,
    state: EdgeState,
}

impl EdgeCore {
    pub fn new(
        config: EdgeConfig,
        driver: MotionDriver,
        cameras: CameraRig,
        detector: Box<dyn MarkerDetector>,
        agent: Option<Box<dyn LearningAgent>>,
    ) -> Self {
        let gripper = Gripper::new(
            config.gripper.enabled,
            config.gripper.open_cmd.clone(),
            config.gripper.close_cmd.clone(),
        );
        let observer = BoardObserver::new(cameras, detector, &config.vision);
        let logger = TrialLogger::new(
            config.edge.trial_log.clone(),
            config.edge.image_ring_dir.clone(),
            config.edge.image_ring_max,
        );
        Self {
            config,
            driver,
            gripper,
            observer,
            logger,
            agent,
            state: EdgeState::Idle,
        }
    }

    /// Wire up the real serial port, snapshot cameras and HTTP agent client.
    pub fn from_config(config: EdgeConfig) -> Result<Self, EdgeError> {
        let serial = &config.serial;
        let link = SerialLink::new(serial.port.clone(), serial.baudrate, Duration::from_millis(50));
        let driver = MotionDriver::new(
            Box::new(link),
            Duration::from_secs_f64(serial.timeout_s),
            Duration::from_millis(serial.settle_ms),
        );
        let cameras = CameraRig::new(
            config
                .cameras
                .devices
                .iter()
                .map(|d| Box::new(SnapshotCamera::new(d.name.clone(), d.path.clone())) as Box<dyn Camera>)
                .collect(),
        );
        let agent: Option<Box<dyn LearningAgent>> = if config.agent.enabled {
            Some(Box::new(AgentClient::new(&config.agent)?))
        } else {
            None
        };
        Ok(Self::new(config, driver, cameras, Box::new(NoMarkers), agent))
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn observer_mut(&mut self) -> &mut BoardObserver {
        &mut self.observer
    }

    pub fn logger(&self) -> &TrialLogger {
        &self.logger
    }

    /// Connect the controller and open every camera. Either both succeed or
    /// the edge stays idle.
    pub fn start(&mut self) -> Result<(), Fault> {
        self.driver.connect()?;
        if let Err(e) = self.observer.open() {
            self.driver.disconnect();
            return Err(e);
        }
        self.state = EdgeState::Connected;
        info!(port = %self.config.serial.port, "edge started");
        Ok(())
    }

    /// Release cameras, then the serial port. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.observer.close();
        self.driver.disconnect();
        if self.state != EdgeState::Idle {
            info!("edge stopped");
        }
        self.state = EdgeState::Idle;
    }

    /// Run `skill_name` under the recovery policy and return its outcome.
    #[instrument(skip(self, theta), fields(square = context.square.as_deref()))]
    pub fn execute_skill(&mut self, skill_name: &str, context: &Context, theta: &Theta) -> SkillOutcome {
        let skill = match skill_name.parse::<Skill>() {
            Ok(skill) => skill,
            Err(e) => {
                warn!(error = %e, "rejecting skill");
                return SkillOutcome::failed(TerminalFailure::Unknown);
            }
        };
        let theta = clamp_theta(theta, &self.config.skills.clamps);
        let attempts = self.config.recovery.retries + 1;

        self.state = EdgeState::Executing;
        let mut outcome = SkillOutcome::failed(TerminalFailure::Unknown);
        for attempt in 1..=attempts {
            outcome = match self.run_skill(skill, context, &theta) {
                Ok(outcome) => outcome,
                Err(fault) => self.handle_fault(fault),
            };
            info!(%skill, attempt, attempts, success = outcome.is_success(),
                failure_code = outcome.failure_code().map(|c| c.as_str()), "skill attempt");
            if !outcome.is_retryable() {
                break;
            }
        }
        self.state = if self.driver.is_connected() {
            EdgeState::Connected
        } else {
            EdgeState::Idle
        };
        self.store_evidence(skill, context);
        outcome
    }

    fn run_skill(&mut self, skill: Skill, context: &Context, theta: &Theta) -> Result<SkillOutcome, Fault> {
        let verify = &self.config.vision.verify;
        let verifier = Verifier::new(
            verify.retries,
            Duration::from_millis(verify.delay_ms),
            self.config.vision.occupancy.min_confidence,
        );
        let mut ctx = SkillContext {
            config: &self.config,
            driver: &mut self.driver,
            gripper: &mut self.gripper,
            vision: &mut self.observer,
            verifier,
        };
        skill.run(&mut ctx, context, theta)
    }

    fn handle_fault(&mut self, fault: Fault) -> SkillOutcome {
        let code = fault.failure_code();
        match &fault {
            Fault::Alarm(line) => {
                error!(alarm = %line, "controller alarm");
                self.recover_from_alarm();
            }
            other => warn!(fault = %other, "skill fault"),
        }
        SkillOutcome::failed(code)
    }

    fn recover_from_alarm(&mut self) {
        let recovery = &self.config.recovery;
        if !recovery.unlock_on_alarm {
            return;
        }
        if let Err(e) = self.driver.unlock() {
            warn!(error = %e, "unlock after alarm failed");
            return;
        }
        if recovery.home_on_unlock
            && let Err(e) = self.driver.home()
        {
            warn!(error = %e, "homing after alarm failed");
        }
    }

    fn store_evidence(&self, skill: Skill, context: &Context) {
        let Some(frame) = self.observer.last_frame() else {
            return;
        };
        let square = context.square.as_deref().unwrap_or("none");
        let tag = format!("{skill}_{square}.pgm");
        if let Err(e) = self.logger.log_image(&tag, &frame.to_camera_frame().to_pgm()) {
            warn!(error = %e, "could not store evidence image");
        }
    }

    /// One agent-driven cycle: ask for theta, execute, report, log locally.
    ///
    /// The local log is written even when the report fails; the report error
    /// is still returned.
    pub fn run_once_from_agent(&mut self) -> Result<SkillOutcome, EdgeError> {
        let square: Square = match self.config.edge.default_square.parse() {
            Ok(square) => square,
            Err(e) => {
                warn!(error = %e, "bad default square");
                return Ok(SkillOutcome::failed(TerminalFailure::Unknown));
            }
        };
        let context = Context::for_square(square);
        let next = match self.agent.as_mut() {
            Some(agent) => agent.next_theta(&context)?,
            None => {
                warn!("no learning agent configured");
                return Ok(SkillOutcome::failed(TerminalFailure::Unknown));
            }
        };
        let skill = if next.skill.is_empty() { "pick" } else { next.skill.as_str() };
        let outcome = self.execute_skill(skill, &context, &next.theta);
        let failure_code = outcome.failure_code();

        let mut metrics = Map::new();
        metrics.insert("skill".into(), json!(skill));
        metrics.insert(
            "failure_code".into(),
            failure_code.map_or(Value::Null, |c| json!(c.as_str())),
        );
        let report = ReportRequest {
            theta_id: next.theta_id.clone(),
            context: context.clone(),
            theta: next.theta.clone(),
            outcome: outcome.is_success(),
            metrics: metrics.clone(),
            failure_code,
        };
        let reported = match self.agent.as_mut() {
            Some(agent) => agent.report(&report),
            None => Ok(()),
        };
        if let Err(e) = &reported {
            warn!(error = %e, theta_id = %next.theta_id, "report failed");
        }

        let record = TrialRecord {
            trial_id: uuid::Uuid::new_v4().to_string(),
            theta_id: next.theta_id,
            context,
            theta: next.theta,
            outcome: outcome.is_success(),
            metrics,
            failure_code,
            timestamp: Some(chrono::Utc::now()),
        };
        self.logger.log_trial(&record)?;
        reported?;
        Ok(outcome)
    }
}

impl Drop for EdgeCore {
    fn drop(&mut self) {
        self.stop();
    }
}
