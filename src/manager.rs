//! Session registry and the public control surface.
//!
//! The id map lock guards insert, remove and lookup only. Each session carries its own async
//! mutex so steps of one session run strictly in order while distinct sessions proceed
//! concurrently. Status reads go through a `watch` channel and never wait on a running step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};

use crate::agent::Agent;
use crate::events::{AgentEvent, EventBus};
use crate::gemini::ModelGateway;
use crate::session::{RunMode, Session, SessionError, SessionId, SessionStatus, SessionView, StepReport};
use crate::surface::Surface;

struct SessionHandle {
    session: Mutex<Session>,
    view: watch::Sender<SessionView>,
    cancel: AtomicBool,
    events: EventBus,
    mode: RunMode,
}

impl SessionHandle {
    fn publish(&self, session: &Session) {
        self.view.send_replace(session.view());
    }
}

pub struct SessionManager<G: ModelGateway + 'static> {
    agent: Arc<Agent<G>>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl<G: ModelGateway + 'static> SessionManager<G> {
    pub fn new(agent: Agent<G>) -> Self {
        Self { agent: Arc::new(agent), sessions: Mutex::new(HashMap::new()) }
    }

    /// Creates a session, captures its first observation and, in autonomous mode, starts
    /// driving it in the background.
    pub async fn start_session(
        &self,
        goal: impl Into<String>,
        surface: Arc<dyn Surface>,
        mode: RunMode,
    ) -> Result<SessionId, SessionError> {
        let mut session = Session::new(goal, surface, mode)?;
        self.agent.seed(&mut session).await?;
        let id = session.id().clone();
        let (view, _) = watch::channel(session.view());
        let handle = Arc::new(SessionHandle {
            events: session.events().clone(),
            session: Mutex::new(session),
            view,
            cancel: AtomicBool::new(false),
            mode,
        });
        self.sessions.lock().await.insert(id.clone(), Arc::clone(&handle));
        info!(session = %id, mode = ?mode, "session started");

        if mode == RunMode::Autonomous {
            let agent = Arc::clone(&self.agent);
            tokio::spawn(drive(agent, handle));
        }
        Ok(id)
    }

    pub async fn step(&self, id: &SessionId) -> Result<StepReport, SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.session.lock().await;
        if session.status().is_terminal() {
            return Err(SessionError::Finished(session.status()));
        }
        Ok(step_once(&self.agent, &handle, &mut session).await)
    }

    /// Runs the session to a terminal state and returns its final view.
    pub async fn run_to_completion(&self, id: &SessionId) -> Result<SessionView, SessionError> {
        let handle = self.handle(id).await?;
        if handle.mode == RunMode::Autonomous {
            let mut rx = handle.view.subscribe();
            let view = rx
                .wait_for(|v| v.status.is_terminal())
                .await
                .map_err(|_| SessionError::NotFound(id.clone()))?;
            return Ok(view.clone());
        }
        let mut session = handle.session.lock().await;
        while !session.status().is_terminal() {
            step_once(&self.agent, &handle, &mut session).await;
        }
        Ok(session.view())
    }

    pub async fn status(&self, id: &SessionId) -> Result<SessionView, SessionError> {
        let handle = self.handle(id).await?;
        let view = handle.view.borrow().clone();
        Ok(view)
    }

    /// Requests cancellation. Takes effect immediately when no step is in flight, otherwise at
    /// the end of the running step.
    pub async fn cancel(&self, id: &SessionId) -> Result<SessionStatus, SessionError> {
        let handle = self.handle(id).await?;
        handle.cancel.store(true, Ordering::SeqCst);
        let status = match handle.session.try_lock() {
            Ok(mut session) => {
                session.finish(SessionStatus::Cancelled);
                handle.publish(&session);
                session.status()
            }
            Err(_) => {
                debug!(session = %id, "cancel deferred to step boundary");
                let status = handle.view.borrow().status;
                status
            }
        };
        Ok(status)
    }

    pub async fn subscribe(&self, id: &SessionId) -> Result<broadcast::Receiver<AgentEvent>, SessionError> {
        Ok(self.handle(id).await?.events.subscribe())
    }

    pub async fn watch_status(&self, id: &SessionId) -> Result<watch::Receiver<SessionView>, SessionError> {
        Ok(self.handle(id).await?.view.subscribe())
    }

    /// Drops a session from the registry. A running autonomous session stops at its next
    /// step boundary.
    pub async fn remove(&self, id: &SessionId) -> Result<SessionView, SessionError> {
        let handle = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        handle.cancel.store(true, Ordering::SeqCst);
        let view = handle.view.borrow().clone();
        Ok(view)
    }

    /// Removes terminal sessions that finished more than `grace` ago.
    pub async fn prune_finished(&self, grace: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, h| {
            let finished_at = h.view.borrow().finished_at;
            finished_at.map_or(true, |t| t.elapsed() < grace)
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, remaining = sessions.len(), "pruned finished sessions");
        }
        pruned
    }

    pub async fn list(&self) -> Vec<SessionView> {
        let handles: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        let mut views: Vec<SessionView> = handles.iter().map(|h| h.view.borrow().clone()).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    async fn handle(&self, id: &SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }
}

async fn step_once<G: ModelGateway>(agent: &Agent<G>, handle: &SessionHandle, session: &mut Session) -> StepReport {
    if session.status() == SessionStatus::Idle && !handle.cancel.load(Ordering::SeqCst) {
        session.status = SessionStatus::Running;
        handle.publish(session);
    }
    let report = agent.step(session, &handle.cancel).await;
    handle.publish(session);
    report
}

async fn drive<G: ModelGateway>(agent: Arc<Agent<G>>, handle: Arc<SessionHandle>) {
    loop {
        let mut session = handle.session.lock().await;
        if session.status().is_terminal() {
            break;
        }
        step_once(&agent, &handle, &mut session).await;
    }
    debug!("autonomous driver exited");
}
