use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionResult, ToolCall};
use crate::conversation::{Image, ModelReply};
use crate::events::AgentEvent;
use crate::gemini::{GatewayError, GenerationParams, ModelGateway};
use crate::prompt::{follow_up_prompt, goal_prompt, RECENT_NOTES};
use crate::session::{Session, SessionStatus, StepReport};
use crate::surface::{Observation, Surface, SurfaceAction, SurfaceError};

// ========================= Configuration =========================

/// Bounded retry with exponential backoff for `Unavailable` gateway errors.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor).min(self.max_backoff)
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub model_timeout: Duration,
    pub action_timeout: Duration,
    pub retry: RetryPolicy,
    pub capture_attempts: u32,
    pub capture_backoff: Duration,
    pub params: GenerationParams,
    pub system_instruction: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            model_timeout: Duration::from_secs(120),
            action_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            capture_attempts: 3,
            capture_backoff: Duration::from_secs(2),
            params: GenerationParams::default(),
            system_instruction: None,
        }
    }
}

// ========================= Agent Core =========================

/// Drives sessions through the observe, generate, translate, act cycle.
pub struct Agent<G: ModelGateway> {
    gateway: G,
    cfg: AgentConfig,
    params: GenerationParams,
}

impl<G: ModelGateway> Agent<G> {
    pub fn new(gateway: G, cfg: AgentConfig) -> Self {
        let params = match &cfg.system_instruction {
            Some(system) => cfg.params.clone().with_system_instruction(system.clone()),
            None => cfg.params.clone(),
        };
        Self { gateway, cfg, params }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Captures the initial observation and appends the goal turn.
    pub async fn seed(&self, session: &mut Session) -> Result<(), SurfaceError> {
        let surface = Arc::clone(&session.surface);
        let obs = self.capture_with_retry(surface.as_ref()).await?;
        let text = goal_prompt(surface.kind(), &obs, surface.dimensions(), &session.goal);
        session.conversation.append_user(text, Some(image_of(&obs)));
        self.observed(session, obs);
        info!(session = %session.id, kind = ?surface.kind(), "session seeded");
        Ok(())
    }

    /// Executes one step. Failures are recorded on the session, never returned.
    pub async fn step(&self, session: &mut Session, cancel: &AtomicBool) -> StepReport {
        if session.status.is_terminal() {
            return report(session, Vec::new(), None);
        }
        if cancel.load(Ordering::SeqCst) {
            session.finish(SessionStatus::Cancelled);
            return report(session, Vec::new(), None);
        }
        session.status = SessionStatus::Running;
        let step = session.steps + 1;
        let surface = Arc::clone(&session.surface);

        if session.conversation.awaiting_input() {
            let obs = self.capture_once(surface.as_ref()).await;
            let fallback = session.last_observation.clone();
            if let Some(o) = obs.as_ref().or(fallback.as_ref()) {
                let text = follow_up_prompt(o, session.steps, session.notebook.recent(RECENT_NOTES));
                session.conversation.append_user(text, obs.as_ref().map(image_of));
            }
            if let Some(o) = obs {
                self.observed(session, o);
            }
        }

        let reply = match self.generate(session).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(session = %session.id, step, error = %err, "model call failed");
                session.events.publish(AgentEvent::Error { message: err.to_string(), step });
                session.fail(err.to_string());
                return report(session, Vec::new(), None);
            }
        };
        session.conversation.append_model(&reply);
        if let Some(summary) = &reply.reasoning_summary {
            session.reasoning.push(summary.clone());
        }
        info!(
            session = %session.id,
            step,
            tool_calls = reply.tool_calls.len(),
            has_text = reply.text.is_some(),
            "agent step"
        );

        let Some((first, surplus)) = reply.tool_calls.split_first() else {
            if let Some(text) = &reply.text {
                info!(session = %session.id, step, "agent message: {}", text.trim());
            }
            session.steps = step;
            self.enforce_budget(session);
            self.honor_cancel(session, cancel);
            return report(session, Vec::new(), reply.reasoning_summary);
        };

        let mut results = Vec::with_capacity(reply.tool_calls.len());
        match session.translator.translate(first, surface.dimensions()) {
            Ok(Action::Completed { summary, success }) => {
                session.steps = step;
                session.summary = Some(summary.clone());
                session.success = Some(success);
                session.events.publish(AgentEvent::Completed { success, summary, steps: step });
                session.finish(SessionStatus::Completed);
                return report(session, Vec::new(), reply.reasoning_summary);
            }
            Ok(action) => results.push(self.perform(session, surface.as_ref(), first, action, step).await),
            Err(err) => {
                warn!(session = %session.id, step, tool = %first.name, error = %err, "tool call rejected");
                results.push(ActionResult::failed(&first.name, err.to_string()));
            }
        }
        results.extend(surplus.iter().map(|call| {
            debug!(session = %session.id, step, tool = %call.name, "surplus tool call discarded");
            ActionResult::failed(&call.name, "not executed: only one action is performed per step")
        }));
        for r in &results {
            session.events.publish(AgentEvent::Action {
                step,
                tool: r.tool.clone(),
                success: r.success,
                message: r.message.clone(),
            });
        }

        session.steps = step;
        let obs = self.capture_once(surface.as_ref()).await;
        session.conversation.append_tool_results(&results, obs.as_ref().map(image_of));
        if let Some(o) = obs {
            self.observed(session, o);
        }

        self.enforce_budget(session);
        self.honor_cancel(session, cancel);
        report(session, results, reply.reasoning_summary)
    }

    /// Steps until the session reaches a terminal state.
    pub async fn run(&self, session: &mut Session, cancel: &AtomicBool) -> SessionStatus {
        while !session.status.is_terminal() {
            self.step(session, cancel).await;
        }
        session.status
    }

    async fn generate(&self, session: &Session) -> Result<ModelReply, GatewayError> {
        let mut attempt = 1;
        loop {
            let call = self.gateway.generate(
                session.conversation.snapshot_for_request(),
                &session.tools,
                &self.params,
            );
            let outcome = match timeout(self.cfg.model_timeout, call).await {
                Ok(res) => res,
                Err(_) => Err(GatewayError::Unavailable(format!(
                    "no reply within {:?}",
                    self.cfg.model_timeout
                ))),
            };
            match outcome {
                Err(err) if err.is_retryable() && attempt < self.cfg.retry.max_attempts => {
                    let delay = self.cfg.retry.backoff(attempt);
                    warn!(session = %session.id, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying model call");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn perform(
        &self,
        session: &mut Session,
        surface: &dyn Surface,
        call: &ToolCall,
        action: Action,
        step: usize,
    ) -> ActionResult {
        match action {
            Action::Surface(sa) => self.execute(surface, &call.name, &sa).await,
            Action::Wait { seconds } => {
                sleep(Duration::from_secs(seconds)).await;
                ActionResult::ok(&call.name, format!("waited {seconds} seconds"))
            }
            Action::Note(cmd) => {
                let reply = session.notebook.apply(&cmd, step);
                session.events.publish(AgentEvent::Notes {
                    notes: session.notebook.notes().to_vec(),
                    op: cmd.op_name().to_string(),
                });
                let result = if reply.success {
                    ActionResult::ok(&call.name, reply.message)
                } else {
                    ActionResult::failed(&call.name, reply.message)
                };
                match reply.data {
                    Some(data) => result.with_data(data),
                    None => result,
                }
            }
            // handled by the caller before dispatch
            Action::Completed { summary, .. } => ActionResult::ok(&call.name, summary),
        }
    }

    async fn execute(&self, surface: &dyn Surface, tool: &str, action: &SurfaceAction) -> ActionResult {
        debug!(tool, action = ?action, "executing surface action");
        match timeout(self.cfg.action_timeout, surface.execute(action)).await {
            Ok(Ok(out)) => {
                let result = ActionResult::ok(tool, out.message);
                match out.data {
                    Some(data) => result.with_data(data),
                    None => result,
                }
            }
            Ok(Err(err)) => {
                warn!(tool, error = %err, "surface action failed");
                ActionResult::failed(tool, err.to_string())
            }
            Err(_) => {
                warn!(tool, "surface action timed out");
                ActionResult::failed(tool, format!("timed out after {:?}", self.cfg.action_timeout))
            }
        }
    }

    async fn capture_with_retry(&self, surface: &dyn Surface) -> Result<Observation, SurfaceError> {
        let attempts = self.cfg.capture_attempts.max(1);
        let mut attempt = 1;
        loop {
            match surface.capture().await {
                Ok(obs) => return Ok(obs),
                Err(err) if attempt < attempts => {
                    warn!(attempt, error = %err, "capture failed, retrying");
                    sleep(self.cfg.capture_backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn capture_once(&self, surface: &dyn Surface) -> Option<Observation> {
        match surface.capture().await {
            Ok(obs) => Some(obs),
            Err(err) => {
                warn!(error = %err, "observation unavailable for this step");
                None
            }
        }
    }

    fn observed(&self, session: &mut Session, obs: Observation) {
        session.events.publish(AgentEvent::Observation {
            step: session.steps,
            url: obs.url.clone(),
            image_base64: obs.image_base64.clone(),
        });
        session.last_observation = Some(obs);
    }

    fn enforce_budget(&self, session: &mut Session) {
        if !session.status.is_terminal() && session.steps >= self.cfg.max_steps {
            warn!(session = %session.id, steps = session.steps, "step budget exhausted");
            session.finish(SessionStatus::StepLimitReached);
        }
    }

    fn honor_cancel(&self, session: &mut Session, cancel: &AtomicBool) {
        if cancel.load(Ordering::SeqCst) {
            session.finish(SessionStatus::Cancelled);
        }
    }
}

fn image_of(obs: &Observation) -> Image {
    Image { mime_type: obs.mime_type.clone(), data_base64: obs.image_base64.clone() }
}

fn report(session: &Session, actions_taken: Vec<ActionResult>, reasoning_summary: Option<String>) -> StepReport {
    StepReport {
        status: session.status,
        actions_taken,
        completed: session.status == SessionStatus::Completed,
        reasoning_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(25),
            multiplier: 2.0,
        };
        assert_eq!(p.backoff(1), Duration::from_secs(10));
        assert_eq!(p.backoff(2), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(25));
    }

    #[test]
    fn test_system_instruction_applied() {
        struct Never;
        #[async_trait::async_trait]
        impl ModelGateway for Never {
            async fn generate<'a>(
                &self,
                _request: crate::conversation::RequestSnapshot<'a>,
                _tools: &crate::tools::ToolSchema,
                _params: &GenerationParams,
            ) -> Result<ModelReply, GatewayError> {
                Err(GatewayError::Auth("unused".into()))
            }
        }
        let cfg = AgentConfig { system_instruction: Some("stay on task".into()), ..Default::default() };
        let agent = Agent::new(Never, cfg);
        assert_eq!(agent.params, GenerationParams::default().with_system_instruction("stay on task"));
    }
}
