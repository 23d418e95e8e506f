use std::{env, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::access::{can_assign, can_close, can_send_reply};
use crate::error::{Error, Result};
use crate::gateway::WppConnectGateway;
use crate::notify::RealtimeHub;
use crate::router::TicketRouter;
use crate::store::{now_iso, parse_agent_row, PgAgentDirectory, PgTicketStore};
use crate::types::{
    Agent, AgentRole, AgentStatus, AssignTicketBody, CreateAgentBody, EventEnvelopeIn, LoginBody,
    PatchAgentStatusBody, PatchTenantSettingsBody, RegisterBody, ReplyBody, Ticket,
    WebhookMessageBody,
};

const DEFAULT_AGENT_LIMIT: i64 = 10;

pub struct AppState {
    db: PgPool,
    router: TicketRouter,
    hub: Arc<RealtimeHub>,
    panel_token: String,
}

fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn resolve_database_url() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return url;
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "ticket_bridge".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

/// Fixed-length digest comparison of the shared webhook secret; avoids
/// leaking the secret length through early-exit string equality.
fn panel_token_matches(expected: &str, provided: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

async fn auth_agent_from_headers(state: &Arc<AppState>, headers: &HeaderMap) -> Result<Agent> {
    let token = bearer_token(headers).ok_or(Error::Unauthenticated("missing bearer token"))?;
    let row = sqlx::query(
        "SELECT a.id, a.tenant_id, a.name, a.email, a.role, a.status, a.created_at \
         FROM auth_tokens t JOIN agents a ON a.id = t.agent_id WHERE t.token = $1",
    )
    .bind(&token)
    .fetch_optional(&state.db)
    .await?
    .ok_or(Error::Unauthenticated("invalid token"))?;
    Ok(parse_agent_row(row))
}

async fn issue_token(state: &Arc<AppState>, agent: &Agent) -> Result<String> {
    let token = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO auth_tokens (token, agent_id, tenant_id, created_at) VALUES ($1,$2,$3,$4)",
    )
    .bind(&token)
    .bind(&agent.id)
    .bind(&agent.tenant_id)
    .bind(now_iso())
    .execute(&state.db)
    .await?;
    Ok(token)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// Entry point for the WhatsApp automation backend. Authenticated with the
/// shared `x-panel-token` secret rather than an agent session.
async fn webhook_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WebhookMessageBody>,
) -> Result<impl IntoResponse> {
    let provided = headers
        .get("x-panel-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() || !panel_token_matches(&state.panel_token, provided) {
        tracing::warn!(tenant_id = %body.tenant_id, "webhook rejected: bad panel token");
        return Err(Error::Unauthenticated("invalid panel token"));
    }

    let outcome = state
        .router
        .route_inbound_message(&body.tenant_id, &body.customer_id, &body.text)
        .await?;
    Ok(Json(webhook_response_body(&outcome)))
}

/// Acknowledgement contract for the automation backend: `{ "ok": true }`
/// plus the routing outcome for callers that want it.
fn webhook_response_body(outcome: &crate::types::RouteOutcome) -> Value {
    json!({
        "ok": true,
        "ticket": outcome.ticket,
        "message": outcome.message,
        "wasAssigned": outcome.was_assigned,
        "isNewTicket": outcome.is_new_ticket
    })
}

/// Bootstrap a tenant with its first admin agent.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&body.email);
    let name = body.name.trim().to_string();
    let workspace_name = body.workspace_name.trim().to_string();
    if email.is_empty() || name.is_empty() || workspace_name.is_empty() {
        return Err(Error::InvalidInput(
            "name, email and workspaceName are required".to_string(),
        ));
    }
    if body.password.trim().len() < 6 {
        return Err(Error::InvalidInput(
            "password must be at least 6 characters".to_string(),
        ));
    }
    let password_hash = hash(&body.password, DEFAULT_COST)
        .map_err(|_| Error::InvalidInput("unable to hash password".to_string()))?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM agents WHERE email = $1")
        .bind(&email)
        .fetch_one(&state.db)
        .await?
        > 0;
    if exists {
        return Err(Error::Conflict("email already registered"));
    }

    let now = now_iso();
    let tenant_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO tenants (id, name, routing_mode, wpp_session_name, wpp_token, \
         agent_limit, message_limit, message_usage, created_at, updated_at) \
         VALUES ($1,$2,'manual','','',$3,NULL,0,$4,$5)",
    )
    .bind(&tenant_id)
    .bind(&workspace_name)
    .bind(DEFAULT_AGENT_LIMIT)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let agent = Agent {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.clone(),
        name,
        email,
        role: AgentRole::Admin,
        status: AgentStatus::Active,
        created_at: now,
    };
    insert_agent(&state.db, &agent, &password_hash).await?;
    let token = issue_token(&state, &agent).await?;

    tracing::info!(%tenant_id, agent_id = %agent.id, "tenant registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "agent": agent, "tenantId": tenant_id })),
    ))
}

async fn insert_agent(db: &PgPool, agent: &Agent, password_hash: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO agents (id, tenant_id, name, email, role, status, password_hash, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
    )
    .bind(&agent.id)
    .bind(&agent.tenant_id)
    .bind(&agent.name)
    .bind(&agent.email)
    .bind(agent.role.as_str())
    .bind(agent.status.as_str())
    .bind(password_hash)
    .bind(&agent.created_at)
    .execute(db)
    .await?;
    Ok(())
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse> {
    let email = normalize_email(&body.email);
    let rows = sqlx::query(
        "SELECT id, tenant_id, name, email, role, status, password_hash, created_at \
         FROM agents WHERE email = $1",
    )
    .bind(&email)
    .fetch_all(&state.db)
    .await?;

    // Email is unique per tenant, not globally; pick the row whose hash
    // matches the supplied password.
    let agent = rows
        .into_iter()
        .find(|row| {
            let password_hash: String = row.get("password_hash");
            verify(&body.password, &password_hash).unwrap_or(false)
        })
        .map(parse_agent_row)
        .ok_or(Error::Unauthenticated("invalid credentials"))?;

    if agent.status != AgentStatus::Active {
        return Err(Error::Forbidden("agent is deactivated"));
    }
    let token = issue_token(&state, &agent).await?;
    Ok(Json(
        json!({ "token": token, "agent": agent, "tenantId": agent.tenant_id }),
    ))
}

async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let agent = auth_agent_from_headers(&state, &headers).await?;
    Ok(Json(json!({ "agent": agent })))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    if caller.role != AgentRole::Admin {
        return Err(Error::Forbidden("admin role required"));
    }
    let rows = sqlx::query(
        "SELECT id, tenant_id, name, email, role, status, created_at \
         FROM agents WHERE tenant_id = $1 ORDER BY created_at ASC",
    )
    .bind(&caller.tenant_id)
    .fetch_all(&state.db)
    .await?;
    let agents = rows.into_iter().map(parse_agent_row).collect::<Vec<_>>();
    Ok(Json(json!({ "agents": agents })))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentBody>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    if caller.role != AgentRole::Admin {
        return Err(Error::Forbidden("admin role required"));
    }
    let email = normalize_email(&body.email);
    let name = body.name.trim().to_string();
    if email.is_empty() || name.is_empty() || body.password.trim().len() < 6 {
        return Err(Error::InvalidInput("invalid agent payload".to_string()));
    }

    let tenant = state
        .router
        .store()
        .get_tenant(&caller.tenant_id)
        .await?
        .ok_or(Error::NotFound("tenant"))?;
    let agent_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM agents WHERE tenant_id = $1")
            .bind(&caller.tenant_id)
            .fetch_one(&state.db)
            .await?;
    if agent_count >= tenant.agent_limit {
        return Err(Error::QuotaExceeded { resource: "agent" });
    }

    let taken = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM agents WHERE tenant_id = $1 AND email = $2",
    )
    .bind(&caller.tenant_id)
    .bind(&email)
    .fetch_one(&state.db)
    .await?
        > 0;
    if taken {
        return Err(Error::Conflict("email already registered"));
    }

    let password_hash = hash(&body.password, DEFAULT_COST)
        .map_err(|_| Error::InvalidInput("unable to hash password".to_string()))?;
    let agent = Agent {
        id: Uuid::new_v4().to_string(),
        tenant_id: caller.tenant_id.clone(),
        name,
        email,
        role: body.role,
        status: AgentStatus::Active,
        created_at: now_iso(),
    };
    insert_agent(&state.db, &agent, &password_hash).await?;
    Ok((StatusCode::CREATED, Json(json!({ "agent": agent }))))
}

/// Admins may toggle anyone in the tenant; agents only themselves.
async fn patch_agent_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<PatchAgentStatusBody>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    if caller.role != AgentRole::Admin && caller.id != agent_id {
        return Err(Error::Forbidden("cannot change another agent's status"));
    }
    let row = sqlx::query(
        "UPDATE agents SET status = $1 WHERE id = $2 AND tenant_id = $3 \
         RETURNING id, tenant_id, name, email, role, status, created_at",
    )
    .bind(body.status.as_str())
    .bind(&agent_id)
    .bind(&caller.tenant_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(Error::NotFound("agent"))?;
    Ok(Json(json!({ "agent": parse_agent_row(row) })))
}

async fn get_tenant_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let tenant = state
        .router
        .store()
        .get_tenant(&caller.tenant_id)
        .await?
        .ok_or(Error::NotFound("tenant"))?;
    Ok(Json(json!({ "tenant": tenant })))
}

async fn patch_tenant_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PatchTenantSettingsBody>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    if caller.role != AgentRole::Admin {
        return Err(Error::Forbidden("admin role required"));
    }
    let mut tenant = state
        .router
        .store()
        .get_tenant(&caller.tenant_id)
        .await?
        .ok_or(Error::NotFound("tenant"))?;

    if let Some(mode) = body.routing_mode {
        tenant.routing_mode = mode;
    }
    if let Some(session_name) = body.wpp_session_name {
        tenant.wpp_session_name = session_name.trim().to_string();
    }
    if let Some(token) = body.wpp_token {
        tenant.wpp_token = token.trim().to_string();
    }
    if let Some(limit) = body.message_limit {
        if limit < 0 {
            return Err(Error::InvalidInput(
                "messageLimit must be non-negative".to_string(),
            ));
        }
        tenant.message_limit = Some(limit);
    }
    tenant.updated_at = now_iso();

    sqlx::query(
        "UPDATE tenants SET routing_mode = $1, wpp_session_name = $2, wpp_token = $3, \
         message_limit = $4, updated_at = $5 WHERE id = $6",
    )
    .bind(tenant.routing_mode.as_str())
    .bind(&tenant.wpp_session_name)
    .bind(&tenant.wpp_token)
    .bind(tenant.message_limit)
    .bind(&tenant.updated_at)
    .bind(&tenant.id)
    .execute(&state.db)
    .await?;
    Ok(Json(json!({ "tenant": tenant })))
}

async fn get_waiting_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let tickets = state.router.store().list_waiting(&caller.tenant_id).await?;
    Ok(Json(json!({ "tickets": tickets })))
}

async fn get_my_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let tickets = state
        .router
        .store()
        .list_assigned(&caller.tenant_id, &caller.id)
        .await?;
    Ok(Json(json!({ "tickets": tickets })))
}

fn can_view(caller: &Agent, ticket: &Ticket) -> bool {
    caller.role == AgentRole::Admin
        || ticket.assigned_to.as_deref() == Some(caller.id.as_str())
        || ticket.assigned_to.is_none()
}

async fn load_ticket_for(state: &Arc<AppState>, caller: &Agent, ticket_id: &str) -> Result<Ticket> {
    state
        .router
        .store()
        .get_ticket(&caller.tenant_id, ticket_id)
        .await?
        .ok_or(Error::NotFound("ticket"))
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let ticket = load_ticket_for(&state, &caller, &ticket_id).await?;
    if !can_view(&caller, &ticket) {
        return Err(Error::Forbidden("ticket belongs to another agent"));
    }
    Ok(Json(json!({ "ticket": ticket })))
}

async fn get_ticket_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let ticket = load_ticket_for(&state, &caller, &ticket_id).await?;
    if !can_view(&caller, &ticket) {
        return Err(Error::Forbidden("ticket belongs to another agent"));
    }
    let messages = state
        .router
        .store()
        .list_messages(&caller.tenant_id, &ticket_id)
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

/// Claim (agent, no body agentId) or assign (admin, any agentId). The store
/// does the status compare-and-swap; this layer only decides who may ask.
async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
    Json(body): Json<AssignTicketBody>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let ticket = load_ticket_for(&state, &caller, &ticket_id).await?;
    let target_agent_id = body.agent_id.unwrap_or_else(|| caller.id.clone());
    if !can_assign(caller.role, &caller.id, &ticket, &target_agent_id) {
        tracing::warn!(
            tenant_id = %caller.tenant_id,
            %ticket_id,
            caller_id = %caller.id,
            %target_agent_id,
            "assignment denied"
        );
        return Err(Error::Forbidden("not allowed to assign this ticket"));
    }

    let allow_reassign = caller.role == AgentRole::Admin;
    let ticket = state
        .router
        .assign_ticket(&caller.tenant_id, &ticket_id, &target_agent_id, allow_reassign)
        .await?;
    Ok(Json(json!({ "ticket": ticket })))
}

async fn close_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let ticket = load_ticket_for(&state, &caller, &ticket_id).await?;
    if !can_close(caller.role, &caller.id, &ticket) {
        tracing::warn!(
            tenant_id = %caller.tenant_id,
            %ticket_id,
            caller_id = %caller.id,
            "close denied"
        );
        return Err(Error::Forbidden("not allowed to close this ticket"));
    }
    let ticket = state.router.close_ticket(&caller.tenant_id, &ticket_id).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

async fn reply_to_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
    Json(body): Json<ReplyBody>,
) -> Result<impl IntoResponse> {
    let caller = auth_agent_from_headers(&state, &headers).await?;
    let ticket = load_ticket_for(&state, &caller, &ticket_id).await?;
    if !can_send_reply(caller.role, &caller.id, &ticket) {
        tracing::warn!(
            tenant_id = %caller.tenant_id,
            %ticket_id,
            caller_id = %caller.id,
            "reply denied"
        );
        return Err(Error::Forbidden("not allowed to reply on this ticket"));
    }

    let (ticket, message, delivery_warning) = state
        .router
        .send_reply(&caller.tenant_id, &ticket_id, &body.text)
        .await?;
    Ok(Json(json!({
        "ticket": ticket,
        "message": message,
        "deliveryWarning": delivery_warning
    })))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Agents connect, then authenticate with `agent:join` carrying their API
/// token; that scopes the connection to the tenant room and sends a queue
/// snapshot so the panel can render without a second fetch.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.hub.register_client(tx).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            continue;
        };

        if envelope.event.as_str() == "agent:join" {
            let token = envelope
                .data
                .get("token")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let tenant_id = sqlx::query_scalar::<_, String>(
                "SELECT tenant_id FROM auth_tokens WHERE token = $1",
            )
            .bind(&token)
            .fetch_optional(&state.db)
            .await
            .ok()
            .flatten();

            let Some(tenant_id) = tenant_id else {
                state
                    .hub
                    .emit_to_client(
                        client_id,
                        "auth:error",
                        json!({ "message": "invalid agent token" }),
                    )
                    .await;
                continue;
            };

            state.hub.join_tenant(client_id, &tenant_id).await;
            match state.router.store().list_waiting(&tenant_id).await {
                Ok(waiting) => {
                    state
                        .hub
                        .emit_to_client(client_id, "queue:snapshot", json!({ "tickets": waiting }))
                        .await;
                }
                Err(err) => {
                    tracing::warn!(%tenant_id, error = %err, "queue snapshot failed");
                }
            }
        }
    }

    state.hub.unregister_client(client_id).await;
    send_task.abort();
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(4000);
    let database_url = resolve_database_url();
    let panel_token =
        env::var("PANEL_TOKEN").expect("PANEL_TOKEN is required to authenticate webhook calls");
    let wpp_base_url =
        env::var("WPP_API_URL").unwrap_or_else(|_| "http://localhost:21465".to_string());

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    let hub = Arc::new(RealtimeHub::default());
    let router = TicketRouter::new(
        Arc::new(PgTicketStore::new(db.clone())),
        Arc::new(PgAgentDirectory::new(db.clone())),
        hub.clone(),
        Arc::new(WppConnectGateway::new(&wpp_base_url)),
    );
    let state = Arc::new(AppState {
        db,
        router,
        hub,
        panel_token,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/internal/wpp/message", post(webhook_message))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(get_me))
        .route("/api/agents", get(list_agents).post(create_agent))
        .route("/api/agents/{agent_id}/status", axum::routing::patch(patch_agent_status))
        .route(
            "/api/tenant/settings",
            get(get_tenant_settings).patch(patch_tenant_settings),
        )
        .route("/api/tickets/waiting", get(get_waiting_tickets))
        .route("/api/tickets/mine", get(get_my_tickets))
        .route("/api/tickets/{ticket_id}", get(get_ticket))
        .route(
            "/api/tickets/{ticket_id}/messages",
            get(get_ticket_messages).post(reply_to_ticket),
        )
        .route("/api/tickets/{ticket_id}/assign", post(assign_ticket))
        .route("/api/tickets/{ticket_id}/close", post(close_ticket))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!(%addr, "ticket bridge listening");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RouteOutcome, SenderRole, TicketMessage, TicketStatus};

    fn outcome() -> RouteOutcome {
        let now = now_iso();
        RouteOutcome {
            ticket: Ticket {
                id: "t-1".to_string(),
                tenant_id: "org-1".to_string(),
                customer_number: "+5511999999999".to_string(),
                status: TicketStatus::Waiting,
                assigned_to: None,
                last_message: "hello".to_string(),
                created_at: now.clone(),
                updated_at: now.clone(),
            },
            message: TicketMessage {
                id: "m-1".to_string(),
                ticket_id: "t-1".to_string(),
                tenant_id: "org-1".to_string(),
                sender: SenderRole::Customer,
                text: "hello".to_string(),
                created_at: now,
            },
            was_assigned: false,
            is_new_ticket: true,
        }
    }

    #[test]
    fn webhook_ack_carries_ok_true() {
        let body = webhook_response_body(&outcome());
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["ticket"]["id"], json!("t-1"));
        assert_eq!(body["isNewTicket"], json!(true));
    }

    #[test]
    fn panel_token_comparison_is_exact() {
        assert!(panel_token_matches("shared-secret", "shared-secret"));
        assert!(!panel_token_matches("shared-secret", "shared-secret "));
        assert!(!panel_token_matches("shared-secret", ""));
    }

    #[test]
    fn bearer_token_requires_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));

        let mut bad = HeaderMap::new();
        bad.insert("authorization", "Token abc123".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
    }
}
