mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{auction_record, orchestrator, proposal_record, text, tool_call, FakeDataProvider, ScriptedModel, Step};
use dao_chat::client::ClientError;
use dao_chat::config::ChatConfig;
use dao_chat::stream::{decode_frame, StreamEvent};
use dao_chat::web_server::{app_state, build_router};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::json;
use tempfile::TempDir;

fn project_dir(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(name)
}

fn server_with(model: ScriptedModel, templates: PathBuf, static_dir: &Path) -> (TestServer, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let data = Arc::new(FakeDataProvider::with_current_auction(auction_record(400, None)));
    let mut config = ChatConfig::from_env();
    config.dao = common::yellow();
    config.templates_dir = templates;
    let state = app_state(config, orchestrator(model.clone(), data, 5));
    let server = TestServer::new(build_router(state, static_dir)).unwrap();
    (server, model)
}

fn server(model: ScriptedModel) -> (TestServer, Arc<ScriptedModel>) {
    server_with(model, project_dir("templates"), &project_dir("static"))
}

async fn events_of(body: &str) -> Vec<StreamEvent> {
    futures::stream::iter([Ok::<_, std::convert::Infallible>(body.to_string())])
        .eventsource()
        .map(|frame| decode_frame(&frame.unwrap().data).unwrap())
        .collect()
        .await
}

#[test_log::test(tokio::test)]
async fn test_chat_streams_turn_events() {
    let (server, _) = server(ScriptedModel::new(vec![
        Step::Events(vec![tool_call("c1", "getCurrentAuction", json!({}))]),
        Step::Events(vec![text("No bids yet on Yellow #400.")]),
    ]));

    let response = server
        .post("/api/chat")
        .json(&json!({ "messages": [{ "role": "user", "content": "How much is the current bid auction now?" }] }))
        .await;
    response.assert_status_ok();
    assert!(response
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = events_of(&response.text()).await;
    assert!(matches!(events[0], StreamEvent::TurnStart { .. }));
    assert!(matches!(events[1], StreamEvent::ToolCallRequested { .. }));
    assert!(matches!(events[2], StreamEvent::ToolCallResolved { .. }));
    assert!(events.contains(&StreamEvent::TextDelta {
        delta: "No bids yet on Yellow #400.".to_string()
    }));
    assert!(matches!(events.last(), Some(StreamEvent::TurnComplete { round_trips: 1, .. })));
}

#[tokio::test]
async fn test_malformed_requests_are_rejected_before_streaming() {
    let (server, model) = server(ScriptedModel::new(vec![]));

    let bad_json = server
        .post("/api/chat")
        .bytes("{not json".into())
        .content_type("application/json")
        .await;
    bad_json.assert_status(StatusCode::BAD_REQUEST);

    let wrong_shape = server.post("/api/chat").json(&json!({ "prompt": "hi" })).await;
    wrong_shape.assert_status(StatusCode::BAD_REQUEST);

    let empty = server.post("/api/chat").json(&json!({ "messages": [] })).await;
    empty.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(empty.json::<serde_json::Value>()["error"], "messages must not be empty");

    let user_with_tools = server
        .post("/api/chat")
        .json(&json!({ "messages": [{
            "role": "user",
            "content": "hi",
            "toolInvocations": [{ "toolCallId": "c1", "toolName": "getDaoInfo", "args": {}, "state": "pending" }]
        }] }))
        .await;
    user_with_tools.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(model.request_count(), 0);
}

#[tokio::test]
async fn test_index_lists_quick_questions() {
    let (server, _) = server(ScriptedModel::new(vec![]));
    let response = server.get("/").await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("Yellow DAO"));
    assert!(html.contains("Who won auction 350?"));
    assert!(html.contains("/static/chat.js"));
}

#[tokio::test]
async fn test_index_uses_configured_templates() {
    let templates = TempDir::new().unwrap();
    std::fs::write(
        templates.path().join("index.html"),
        "<h1>{{ dao_name }}</h1>{% for q in quick_questions %}<li>{{ q }}</li>{% endfor %}",
    )
    .unwrap();
    let static_dir = TempDir::new().unwrap();
    let (server, _) = server_with(ScriptedModel::new(vec![]), templates.path().to_path_buf(), static_dir.path());

    let html = server.get("/").await.text();
    assert!(html.starts_with("<h1>Yellow</h1>"));
    assert_eq!(html.matches("<li>").count(), 4);
}

#[tokio::test]
async fn test_cards_render_invocations() {
    let (server, _) = server(ScriptedModel::new(vec![]));

    let pending = server
        .post("/api/cards")
        .json(&json!({ "toolCallId": "c1", "toolName": "getCurrentAuction", "args": {}, "state": "pending" }))
        .await;
    pending.assert_status_ok();
    assert!(pending.text().contains("Calling getCurrentAuction..."));

    let resolved = server
        .post("/api/cards")
        .json(&json!({
            "toolCallId": "c1",
            "toolName": "getCurrentAuction",
            "args": {},
            "state": "resolved",
            "result": { "status": "ok", "data": serde_json::to_value(auction_record(400, None)).unwrap() }
        }))
        .await;
    resolved.assert_status_ok();
    let html = resolved.text();
    assert!(html.contains("No bids yet"));
    assert!(html.contains("Yellow #400"));

    let invalid = server.post("/api/cards").json(&json!({ "toolName": 3 })).await;
    invalid.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proposal_card_renders_description_markdown() {
    let (server, _) = server(ScriptedModel::new(vec![]));
    let mut proposal = proposal_record(12);
    proposal.description = "## Summary\nPrint **500** zines.\n\n<script>alert(1)</script>".to_string();

    let response = server
        .post("/api/cards")
        .json(&json!({
            "toolCallId": "c1",
            "toolName": "getProposal",
            "args": { "proposalNumber": 12 },
            "state": "resolved",
            "result": { "status": "ok", "data": serde_json::to_value(proposal).unwrap() }
        }))
        .await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("<h2>Summary</h2>"));
    assert!(html.contains("<strong>500</strong>"));
    assert!(!html.contains("<script>"));
}

#[tokio::test]
async fn test_markdown_endpoint() {
    let (server, _) = server(ScriptedModel::new(vec![]));

    let response = server
        .post("/api/markdown")
        .json(&json!({ "text": "The highest bid is **0.25 ETH**.\n\n- 4 bids" }))
        .await;
    response.assert_status_ok();
    assert!(response
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = response.text();
    assert!(html.contains("<strong>0.25 ETH</strong>"));
    assert!(html.contains("<li>4 bids</li>"));

    let invalid = server.post("/api/markdown").json(&json!({ "markdown": "x" })).await;
    invalid.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_static_files_and_not_found() {
    let (server, _) = server(ScriptedModel::new(vec![]));
    let script = server.get("/static/chat.js").await;
    script.assert_status_ok();
    // The page fails a cut-off stream with the same message as the Rust client
    assert!(script.text().contains(&ClientError::Incomplete.to_string()));
    assert!(script.text().contains("/api/markdown"));
    let missing = server.get("/static/missing.js").await;
    missing.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(missing.text(), "Not Found");
}
