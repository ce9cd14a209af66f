use async_trait::async_trait;
use glass_pilot::conversation::{Part, RequestSnapshot, Role, Turn};
use glass_pilot::gemini::{GatewayError, GenerationParams, ModelGateway};
use glass_pilot::surface::{ActionOutcome, Observation, Point, Surface, SurfaceAction, SurfaceError, SurfaceKind};
use glass_pilot::tools::ToolSchema;
use glass_pilot::{
    Agent, AgentConfig, AgentEvent, ModelReply, RetryPolicy, RunMode, SessionError, SessionManager, SessionStatus,
    ToolCall,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ========================= Fakes =========================

type Responder = Box<dyn Fn(usize, &RequestSnapshot<'_>) -> Result<ModelReply, GatewayError> + Send + Sync>;

struct Recorded {
    turns: Vec<Turn>,
    continuity: Option<String>,
}

struct Script {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
}

#[derive(Clone)]
struct FakeGateway(Arc<Script>);

impl FakeGateway {
    fn build(
        delay: Duration,
        f: impl Fn(usize, &RequestSnapshot<'_>) -> Result<ModelReply, GatewayError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(Script {
            responder: Box::new(f),
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }))
    }

    fn from_fn(f: impl Fn(usize, &RequestSnapshot<'_>) -> Result<ModelReply, GatewayError> + Send + Sync + 'static) -> Self {
        Self::build(Duration::ZERO, f)
    }

    /// Replays `replies` in order, repeating the last one once exhausted.
    fn scripted(replies: Vec<Result<ModelReply, GatewayError>>) -> Self {
        Self::slow(Duration::ZERO, replies)
    }

    /// Like `scripted`, but every reply takes `delay` to arrive.
    fn slow(delay: Duration, replies: Vec<Result<ModelReply, GatewayError>>) -> Self {
        Self::build(delay, move |i, _| replies[i.min(replies.len() - 1)].clone())
    }

    fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> std::sync::MutexGuard<'_, Vec<Recorded>> {
        self.0.requests.lock().unwrap()
    }
}

#[async_trait]
impl ModelGateway for FakeGateway {
    async fn generate<'a>(
        &self,
        request: RequestSnapshot<'a>,
        _tools: &ToolSchema,
        _params: &GenerationParams,
    ) -> Result<ModelReply, GatewayError> {
        let i = self.0.calls.fetch_add(1, Ordering::SeqCst);
        self.0.requests.lock().unwrap().push(Recorded {
            turns: request.turns.to_vec(),
            continuity: request.continuity.map(|t| t.as_str().to_string()),
        });
        if !self.0.delay.is_zero() {
            tokio::time::sleep(self.0.delay).await;
        }
        (self.0.responder)(i, &request)
    }
}

struct FakeSurface {
    label: String,
    delay: Duration,
    executed: Mutex<Vec<SurfaceAction>>,
    captures: AtomicUsize,
}

impl FakeSurface {
    fn new(label: &str) -> Arc<Self> {
        Self::slow(label, Duration::ZERO)
    }

    /// Every action takes `delay` before it lands.
    fn slow(label: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            delay,
            executed: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
        })
    }

    fn executed(&self) -> Vec<SurfaceAction> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Surface for FakeSurface {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Browser
    }

    fn dimensions(&self) -> (u32, u32) {
        (1000, 500)
    }

    async fn capture(&self) -> Result<Observation, SurfaceError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let n = self.executed.lock().unwrap().len();
        Ok(Observation {
            id: format!("{}-{n}", self.label),
            image_base64: format!("img-{}-{n}", self.label),
            mime_type: "image/png".into(),
            url: Some(format!("https://fake.test/{}", self.label)),
            tabs: Vec::new(),
            captured_at_ms: 0,
        })
    }

    async fn execute(&self, action: &SurfaceAction) -> Result<ActionOutcome, SurfaceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.executed.lock().unwrap().push(action.clone());
        Ok(ActionOutcome::message("done"))
    }
}

fn call(name: &str, args: serde_json::Value) -> ModelReply {
    ModelReply { tool_calls: vec![ToolCall::new(name, args)], ..Default::default() }
}

fn hover(x: u32) -> ModelReply {
    call("mouse_hover", json!({ "x": x, "y": 500 }))
}

fn complete(summary: &str) -> ModelReply {
    ModelReply {
        reasoning_summary: Some("the page shows the answer".into()),
        ..call("task_complete", json!({ "summary": summary, "success": true }))
    }
}

fn config(max_steps: usize) -> AgentConfig {
    AgentConfig {
        max_steps,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        },
        capture_backoff: Duration::from_millis(1),
        model_timeout: Duration::from_secs(5),
        action_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn manager(gateway: &FakeGateway, max_steps: usize) -> SessionManager<FakeGateway> {
    manager_with(gateway, config(max_steps))
}

fn manager_with(gateway: &FakeGateway, cfg: AgentConfig) -> SessionManager<FakeGateway> {
    SessionManager::new(Agent::new(gateway.clone(), cfg))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn text_of(turn: &Turn) -> String {
    turn.parts()
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ========================= Scenarios =========================

#[tokio::test]
async fn test_immediate_completion() {
    let gateway = FakeGateway::scripted(vec![Ok(complete("found it"))]);
    let mgr = manager(&gateway, 10);
    let surface = FakeSurface::new("a");
    let id = mgr.start_session("find it", surface.clone(), RunMode::SingleStep).await.unwrap();
    assert_eq!(mgr.status(&id).await.unwrap().status, SessionStatus::Idle);

    let report = mgr.step(&id).await.unwrap();
    assert!(report.completed);
    assert_eq!(report.status, SessionStatus::Completed);
    assert!(report.actions_taken.is_empty());
    assert_eq!(gateway.calls(), 1);
    assert!(surface.executed().is_empty());
    // only the seed observation; completion and status reads never capture
    assert_eq!(surface.captures.load(Ordering::SeqCst), 1);

    let view = mgr.status(&id).await.unwrap();
    assert_eq!(view.summary.as_deref(), Some("found it"));
    assert_eq!(view.success, Some(true));
    assert_eq!(view.reasoning, vec!["the page shows the answer".to_string()]);
    assert_eq!(view.steps, 1);
}

#[tokio::test]
async fn test_step_budget_is_not_failure() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(500))]);
    let mgr = manager(&gateway, 5);
    let surface = FakeSurface::new("b");
    let id = mgr.start_session("never done", surface.clone(), RunMode::SingleStep).await.unwrap();
    let mut rx = mgr.subscribe(&id).await.unwrap();

    let view = mgr.run_to_completion(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::StepLimitReached);
    assert_eq!(view.steps, 5);
    assert_eq!(view.error, None);
    assert_eq!(surface.executed().len(), 5);
    assert_eq!(gateway.calls(), 5);

    let events = drain(&mut rx);
    assert!(
        matches!(events.last(), Some(AgentEvent::StepLimitReached { steps: 5 })),
        "{:?}",
        events.last()
    );
}

#[tokio::test]
async fn test_out_of_range_coordinate_is_fed_back() {
    let gateway = FakeGateway::scripted(vec![
        Ok(call("mouse_click", json!({ "x": 1200, "y": 10, "button": "left" }))),
        Ok(complete("ok")),
    ]);
    let mgr = manager(&gateway, 10);
    let surface = FakeSurface::new("c");
    let id = mgr.start_session("click", surface.clone(), RunMode::SingleStep).await.unwrap();

    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Running);
    assert_eq!(report.actions_taken.len(), 1);
    assert!(!report.actions_taken[0].success);
    assert!(report.actions_taken[0].message.contains("outside [0, 1000]"), "{}", report.actions_taken[0].message);
    assert!(surface.executed().is_empty());

    mgr.step(&id).await.unwrap();
    let requests = gateway.requests();
    let last = requests[1].turns.last().unwrap();
    assert_eq!(last.role(), Role::ToolResult);
    match &last.parts()[0] {
        Part::FunctionResult { name, response } => {
            assert_eq!(name, "mouse_click");
            assert_eq!(response["success"], false);
        }
        other => panic!("unexpected part {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_error_fails_without_retry() {
    let gateway = FakeGateway::scripted(vec![Err(GatewayError::Auth("bad key".into()))]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("anything", FakeSurface::new("d"), RunMode::SingleStep).await.unwrap();

    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(gateway.calls(), 1);
    let view = mgr.status(&id).await.unwrap();
    assert!(view.error.unwrap().contains("authentication failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sessions_stay_isolated() {
    // goal "name:n" asks for n hovers before completing
    let gateway = FakeGateway::from_fn(|_, req| {
        let goal = text_of(&req.turns[0]);
        let n: usize = goal
            .lines()
            .find_map(|l| l.strip_prefix("Goal: "))
            .and_then(|g| g.split(':').nth(1))
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0);
        let done = req.turns.iter().filter(|t| t.role() == Role::ToolResult).count();
        Ok(if done < n { hover(100 * (done as u32 + 1)) } else { complete(&goal) })
    });
    let mgr = Arc::new(manager(&gateway, 20));
    let alpha = FakeSurface::new("alpha");
    let beta = FakeSurface::new("beta");
    let a = mgr.start_session("alpha:3", alpha.clone(), RunMode::Autonomous).await.unwrap();
    let b = mgr.start_session("beta:5", beta.clone(), RunMode::Autonomous).await.unwrap();

    let (va, vb) = tokio::join!(mgr.run_to_completion(&a), mgr.run_to_completion(&b));
    let (va, vb) = (va.unwrap(), vb.unwrap());
    assert_eq!(va.status, SessionStatus::Completed);
    assert_eq!(vb.status, SessionStatus::Completed);
    assert_eq!(va.steps, 4);
    assert_eq!(vb.steps, 6);

    let xs = |s: &FakeSurface| -> Vec<u32> {
        s.executed()
            .into_iter()
            .map(|a| match a {
                SurfaceAction::Hover { at: Point { x, .. } } => x,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    };
    assert_eq!(xs(&alpha), [100, 200, 300]);
    assert_eq!(xs(&beta), [100, 200, 300, 400, 500]);

    for r in gateway.requests().iter() {
        let goal = text_of(&r.turns[0]);
        let label = if goal.contains("alpha:3") { "alpha" } else { "beta" };
        for turn in &r.turns {
            for part in turn.parts() {
                if let Part::Image(img) = part {
                    assert!(img.data_base64.starts_with(&format!("img-{label}-")), "{}", img.data_base64);
                }
            }
        }
    }
}

// ========================= Recovery & Control =========================

#[tokio::test]
async fn test_unavailable_is_retried() {
    let gateway = FakeGateway::scripted(vec![
        Err(GatewayError::Unavailable("503".into())),
        Err(GatewayError::Unavailable("503".into())),
        Ok(complete("after retries")),
    ]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("retry", FakeSurface::new("r"), RunMode::SingleStep).await.unwrap();
    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test]
async fn test_persistent_unavailable_fails() {
    let gateway = FakeGateway::scripted(vec![Err(GatewayError::Unavailable("overloaded".into()))]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("retry", FakeSurface::new("r"), RunMode::SingleStep).await.unwrap();
    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test]
async fn test_malformed_reply_ends_run() {
    let gateway = FakeGateway::scripted(vec![Err(GatewayError::Malformed("no candidates".into()))]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("x", FakeSurface::new("m"), RunMode::SingleStep).await.unwrap();
    assert_eq!(mgr.step(&id).await.unwrap().status, SessionStatus::Failed);
    assert_eq!(gateway.calls(), 1);
    assert!(matches!(mgr.step(&id).await, Err(SessionError::Finished(SessionStatus::Failed))));
}

#[tokio::test]
async fn test_cancel_at_step_boundary() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(1))]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("x", FakeSurface::new("k"), RunMode::SingleStep).await.unwrap();
    mgr.step(&id).await.unwrap();
    let mut rx = mgr.subscribe(&id).await.unwrap();

    assert_eq!(mgr.cancel(&id).await.unwrap(), SessionStatus::Cancelled);
    assert_eq!(mgr.status(&id).await.unwrap().status, SessionStatus::Cancelled);
    assert!(matches!(drain(&mut rx).as_slice(), [AgentEvent::Cancelled { steps: 1 }]));
    assert!(matches!(mgr.step(&id).await, Err(SessionError::Finished(SessionStatus::Cancelled))));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_step_is_deferred() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(1))]);
    let mgr = Arc::new(manager(&gateway, 10));
    let surface = FakeSurface::slow("inflight", Duration::from_millis(200));
    let id = mgr.start_session("x", surface.clone(), RunMode::SingleStep).await.unwrap();
    let mut rx = mgr.subscribe(&id).await.unwrap();

    let stepping = {
        let (mgr, id) = (mgr.clone(), id.clone());
        tokio::spawn(async move { mgr.step(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the step holds the session, so the acknowledgement is the pre-cancel status
    assert_eq!(mgr.cancel(&id).await.unwrap(), SessionStatus::Running);

    let report = stepping.await.unwrap().unwrap();
    assert_eq!(report.status, SessionStatus::Cancelled);
    assert!(report.actions_taken[0].success);
    assert_eq!(surface.executed().len(), 1);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(mgr.status(&id).await.unwrap().status, SessionStatus::Cancelled);
    assert!(drain(&mut rx).iter().any(|e| matches!(e, AgentEvent::Cancelled { steps: 1 })));
}

#[tokio::test]
async fn test_action_timeout_is_fed_back() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(1)), Ok(complete("done"))]);
    let mgr = manager_with(&gateway, AgentConfig { action_timeout: Duration::from_millis(50), ..config(10) });
    let surface = FakeSurface::slow("stuck", Duration::from_millis(500));
    let id = mgr.start_session("x", surface.clone(), RunMode::SingleStep).await.unwrap();

    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Running);
    assert!(!report.actions_taken[0].success);
    assert!(report.actions_taken[0].message.contains("timed out"), "{}", report.actions_taken[0].message);
    assert!(surface.executed().is_empty());

    assert_eq!(mgr.step(&id).await.unwrap().status, SessionStatus::Completed);
    let requests = gateway.requests();
    match &requests[1].turns.last().unwrap().parts()[0] {
        Part::FunctionResult { response, .. } => assert_eq!(response["success"], false),
        other => panic!("unexpected part {other:?}"),
    }
}

#[tokio::test]
async fn test_model_timeout_is_retried_then_fails() {
    let gateway = FakeGateway::slow(Duration::from_millis(500), vec![Ok(complete("too late"))]);
    let mgr = manager_with(&gateway, AgentConfig { model_timeout: Duration::from_millis(50), ..config(10) });
    let id = mgr.start_session("x", FakeSurface::new("late"), RunMode::SingleStep).await.unwrap();

    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(gateway.calls(), 3);
    let error = mgr.status(&id).await.unwrap().error.unwrap();
    assert!(error.contains("model unavailable"), "{error}");
}

#[tokio::test]
async fn test_capture_leaves_surface_untouched() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(1)), Ok(complete("done"))]);
    let mgr = manager(&gateway, 10);
    let surface = FakeSurface::new("still");
    let id = mgr.start_session("x", surface.clone(), RunMode::SingleStep).await.unwrap();

    let first = surface.capture().await.unwrap();
    let second = surface.capture().await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.image_base64, second.image_base64);

    // reads never reach the surface
    let before = surface.captures.load(Ordering::SeqCst);
    mgr.status(&id).await.unwrap();
    mgr.list().await;
    mgr.subscribe(&id).await.unwrap();
    assert_eq!(surface.captures.load(Ordering::SeqCst), before);
    assert!(surface.executed().is_empty());

    // extra captures do not shift what the model sees next
    mgr.step(&id).await.unwrap();
    mgr.step(&id).await.unwrap();
    let requests = gateway.requests();
    let image = requests[1].turns.last().unwrap().parts().iter().find_map(|p| match p {
        Part::Image(img) => Some(img.data_base64.clone()),
        _ => None,
    });
    assert_eq!(image.as_deref(), Some("img-still-1"));
}

#[tokio::test]
async fn test_unknown_session() {
    let gateway = FakeGateway::scripted(vec![Ok(hover(1))]);
    let mgr = manager(&gateway, 10);
    let missing = glass_pilot::SessionId::from("nope");
    assert!(matches!(mgr.status(&missing).await, Err(SessionError::NotFound(_))));
    assert!(matches!(mgr.cancel(&missing).await, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn test_only_first_tool_call_executes() {
    let gateway = FakeGateway::scripted(vec![
        Ok(ModelReply {
            tool_calls: vec![
                ToolCall::new("mouse_hover", json!({ "x": 500, "y": 500 })),
                ToolCall::new("mouse_click", json!({ "x": 1, "y": 1, "button": "left" })),
            ],
            ..Default::default()
        }),
        Ok(complete("done")),
    ]);
    let mgr = manager(&gateway, 10);
    let surface = FakeSurface::new("s");
    let id = mgr.start_session("x", surface.clone(), RunMode::SingleStep).await.unwrap();

    let report = mgr.step(&id).await.unwrap();
    assert_eq!(report.actions_taken.len(), 2);
    assert!(report.actions_taken[0].success);
    assert!(!report.actions_taken[1].success);
    assert!(report.actions_taken[1].message.starts_with("not executed"));
    assert_eq!(surface.executed(), vec![SurfaceAction::Hover { at: Point { x: 500, y: 250 } }]);

    mgr.step(&id).await.unwrap();
    let requests = gateway.requests();
    let results = requests[1].turns.last().unwrap();
    let responses = results.parts().iter().filter(|p| matches!(p, Part::FunctionResult { .. })).count();
    assert_eq!(responses, 2);
    assert!(matches!(results.parts().last(), Some(Part::Image(_))));
}

#[tokio::test]
async fn test_continuity_token_replayed() {
    let with_sig = |reply: ModelReply, sig: &str| ModelReply {
        continuity: Some(glass_pilot::ContinuityToken::new(sig)),
        ..reply
    };
    let gateway = FakeGateway::scripted(vec![
        Ok(with_sig(hover(1), "s1")),
        Ok(hover(2)),
        Ok(with_sig(hover(3), "s2")),
        Ok(complete("done")),
    ]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("x", FakeSurface::new("t"), RunMode::SingleStep).await.unwrap();
    let view = mgr.run_to_completion(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Completed);

    let seen: Vec<Option<String>> = gateway.requests().iter().map(|r| r.continuity.clone()).collect();
    assert_eq!(seen, [None, Some("s1".into()), Some("s1".into()), Some("s2".into())]);
}

#[tokio::test]
async fn test_text_only_reply_gets_follow_up_prompt() {
    let gateway = FakeGateway::scripted(vec![
        Ok(ModelReply { text: Some("Where should I look?".into()), ..Default::default() }),
        Ok(complete("done")),
    ]);
    let mgr = manager(&gateway, 10);
    let id = mgr.start_session("x", FakeSurface::new("f"), RunMode::SingleStep).await.unwrap();

    let first = mgr.step(&id).await.unwrap();
    assert_eq!(first.status, SessionStatus::Running);
    assert!(first.actions_taken.is_empty());
    mgr.step(&id).await.unwrap();

    let requests = gateway.requests();
    let last = requests[1].turns.last().unwrap();
    assert_eq!(last.role(), Role::User);
    assert!(text_of(last).contains("Steps executed so far: 1"));
    assert!(last.parts().iter().any(|p| matches!(p, Part::Image(_))));
}

#[tokio::test]
async fn test_notes_and_events() {
    let gateway = FakeGateway::scripted(vec![
        Ok(call("add_note", json!({ "content": "price is 42", "category": "important" }))),
        Ok(call("clear_notes", json!({ "confirm": false }))),
        Ok(complete("done")),
    ]);
    let mgr = manager(&gateway, 10);
    let surface = FakeSurface::new("n");
    let id = mgr.start_session("x", surface.clone(), RunMode::SingleStep).await.unwrap();
    let mut rx = mgr.subscribe(&id).await.unwrap();

    let added = mgr.step(&id).await.unwrap();
    assert!(added.actions_taken[0].success);
    assert_eq!(added.actions_taken[0].data.as_ref().unwrap()["note_count"], 1);
    match rx.try_recv().unwrap() {
        AgentEvent::Notes { notes, op } => {
            assert_eq!(op, "add");
            assert_eq!(notes[0].content, "price is 42");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(rx.try_recv().unwrap(), AgentEvent::Action { success: true, .. }));
    assert!(matches!(rx.try_recv().unwrap(), AgentEvent::Observation { step: 1, .. }));

    let refused = mgr.step(&id).await.unwrap();
    assert!(!refused.actions_taken[0].success);
    assert_eq!(mgr.status(&id).await.unwrap().note_count, 1);
    assert!(surface.executed().is_empty());

    mgr.step(&id).await.unwrap();
    assert_eq!(mgr.prune_finished(Duration::ZERO).await, 1);
    assert!(mgr.list().await.is_empty());
}
