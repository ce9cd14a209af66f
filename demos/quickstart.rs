use anyhow::Result;
use glass_pilot::gemini::{GeminiClient, GeminiConfig, GenerationParams, ThinkingLevel};
use glass_pilot::{Agent, AgentConfig, AgentEvent, Browser, BrowserConfig, RunMode, SessionManager};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let goal = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Search example.com for the word 'domain' and report the first paragraph.".to_string());
    let start_url = std::env::var("START_URL").unwrap_or_else(|_| "https://example.com".to_string());

    let browser_cfg = BrowserConfig { headless: false, ..Default::default() };
    let browser = match std::env::var("CHROME_WS_URL") {
        Ok(ws) if !ws.trim().is_empty() => Browser::connect(&ws, browser_cfg).await?,
        _ => Browser::launch(browser_cfg).await?,
    };
    browser.goto(&start_url).await?;

    let gemini = GeminiClient::new(GeminiConfig::default())?;
    let cfg = AgentConfig {
        max_steps: 30,
        params: GenerationParams::new(1.0, ThinkingLevel::Low, true)?,
        system_instruction: Some("Proceed without asking for confirmation. Complete the task end-to-end.".to_string()),
        ..Default::default()
    };
    let manager = SessionManager::new(Agent::new(gemini, cfg));

    // Single-step mode holds the session until run_to_completion, so the subscription
    // below sees every event from the first step on.
    let id = manager.start_session(goal, Arc::new(browser), RunMode::SingleStep).await?;
    let mut events = manager.subscribe(&id).await?;
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AgentEvent::Action { step, tool, success, message } => {
                    info!(step, tool = %tool, success, "{message}")
                }
                AgentEvent::Error { message, step } => info!(step, "error: {message}"),
                AgentEvent::StepLimitReached { steps } => info!(steps, "step budget exhausted"),
                AgentEvent::Cancelled { steps } => info!(steps, "cancelled"),
                _ => {}
            }
        }
    });

    let view = manager.run_to_completion(&id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
