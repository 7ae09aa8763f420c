use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use chrono::Utc;
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::ChatConfig;
use crate::constants::QUICK_QUESTIONS;
use crate::orchestrator::Orchestrator;
use crate::stream::sse_response;
use crate::ui_components::{markdown_to_html, render_tool_invocation};
use crate::{Message, Role, ToolInvocation};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub templates: Arc<AutoReloader>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ChatConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Reasons a chat request is refused before any stream is opened.
#[derive(Debug, Error)]
pub enum ChatRequestError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("messages must not be empty")]
    EmptyConversation,
    #[error("user message {0} carries tool invocations")]
    UserInvocations(usize),
}

impl IntoResponse for ChatRequestError {
    fn into_response(self) -> Response {
        warn!("Rejecting chat request: {}", self);
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ChatRequestError> {
        if self.messages.is_empty() {
            return Err(ChatRequestError::EmptyConversation);
        }
        if let Some(index) = self
            .messages
            .iter()
            .position(|m| m.role == Role::User && !m.tool_invocations.is_empty())
        {
            return Err(ChatRequestError::UserInvocations(index));
        }
        Ok(())
    }
}

// Minijinja Environment setup
pub fn create_minijinja_env(templates_dir: &Path) -> AutoReloader {
    let dir = templates_dir.to_path_buf();
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&dir));
        notifier.watch_path(&dir, true);
        Ok(env)
    })
}

fn render(state: &AppState, template: &str, context: minijinja::Value) -> Result<Html<String>, Response> {
    state
        .templates
        .acquire_env()
        .and_then(|env| env.get_template(template).and_then(|tmpl| tmpl.render(context)))
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template {}: {}", template, e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal Server Error: {}", e)).into_response()
        })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Response> {
    let context = minijinja::context! {
        title => format!("{} DAO Chat", state.config.dao.name),
        dao_name => state.config.dao.name.clone(),
        quick_questions => QUICK_QUESTIONS.to_vec(),
    };
    render(&state, "index.html", context)
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ChatRequestError> {
    let Json(request) = payload.map_err(|e| ChatRequestError::InvalidBody(e.body_text()))?;
    request.validate()?;

    info!(messages = request.messages.len(), "Starting chat turn");
    let events = state.orchestrator.clone().spawn_turn(request.messages);
    Ok(sse_response(events).into_response())
}

async fn card_handler(
    State(state): State<AppState>,
    payload: Result<Json<ToolInvocation>, JsonRejection>,
) -> Result<Html<String>, Response> {
    let Json(invocation) =
        payload.map_err(|e| ChatRequestError::InvalidBody(e.body_text()).into_response())?;
    let card = render_tool_invocation(&invocation, &state.config.dao, Utc::now().timestamp());
    render(&state, "card.html", minijinja::context! { card => card })
}

#[derive(Debug, Deserialize)]
pub struct MarkdownRequest {
    pub text: String,
}

// Assistant replies are markdown; the page asks for HTML once a message is complete
async fn markdown_handler(
    payload: Result<Json<MarkdownRequest>, JsonRejection>,
) -> Result<Html<String>, ChatRequestError> {
    let Json(request) = payload.map_err(|e| ChatRequestError::InvalidBody(e.body_text()))?;
    Ok(Html(markdown_to_html(&request.text)))
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(
        |_req: Request| async { Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response()) },
    ));

    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/cards", post(card_handler))
        .route("/api/markdown", post(markdown_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub fn app_state(config: ChatConfig, orchestrator: Arc<Orchestrator>) -> AppState {
    AppState {
        templates: Arc::new(create_minijinja_env(&config.templates_dir)),
        orchestrator,
        config: Arc::new(config),
    }
}

pub async fn start_web_server(config: ChatConfig, host: &str, port: u16) -> Result<()> {
    let static_dir: PathBuf = config.static_dir.clone();
    let orchestrator = Arc::new(Orchestrator::from_config(&config));
    let app = build_router(app_state(config, orchestrator), &static_dir);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
