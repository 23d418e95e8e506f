use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    Agent, AgentRole, AgentStatus, RoutingMode, SenderRole, Tenant, Ticket, TicketMessage,
    TicketStatus,
};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Owns ticket and message persistence for a tenant. All mutations are
/// keyed by tenant + id; state transitions that must not race use
/// compare-and-swap updates on the expected status.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    async fn find_open_ticket(
        &self,
        tenant_id: &str,
        customer_number: &str,
    ) -> Result<Option<Ticket>>;

    /// Insert a new ticket. A concurrent create for the same (tenant,
    /// customer) loses on the open-ticket unique index and surfaces as
    /// `Conflict`; the caller retries the find path.
    async fn create_open_ticket(
        &self,
        tenant_id: &str,
        customer_number: &str,
        status: TicketStatus,
        assigned_to: Option<&str>,
        last_message: &str,
    ) -> Result<Ticket>;

    /// Update the denormalized preview on an existing ticket. Status and
    /// assignee are untouched; routing decisions happen once, at creation.
    async fn touch_open_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        last_message: &str,
    ) -> Result<Ticket>;

    async fn get_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Option<Ticket>>;

    /// Claim: waiting -> in_progress, guarded by `status = 'waiting'`.
    /// A lost race returns `Conflict`.
    async fn claim_waiting_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        agent_id: &str,
    ) -> Result<Ticket>;

    /// Admin assignment: also permits re-assigning an in_progress ticket.
    /// Assigning a closed ticket returns `Conflict`.
    async fn assign_open_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        agent_id: &str,
    ) -> Result<Ticket>;

    /// Close is terminal and idempotent. The bool reports whether this call
    /// performed the transition (false when the ticket was already closed).
    async fn close_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<(Ticket, bool)>;

    async fn append_message(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        sender: SenderRole,
        text: &str,
    ) -> Result<TicketMessage>;

    async fn list_waiting(&self, tenant_id: &str) -> Result<Vec<Ticket>>;

    async fn list_assigned(&self, tenant_id: &str, agent_id: &str) -> Result<Vec<Ticket>>;

    async fn list_messages(&self, tenant_id: &str, ticket_id: &str) -> Result<Vec<TicketMessage>>;

    /// Best-effort usage counter bump; callers fire-and-forget this.
    async fn increment_message_usage(&self, tenant_id: &str) -> Result<()>;
}

/// Read model over agent rows: who is eligible for routing and how loaded
/// they are right now.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Active agents with role `agent`, in stable creation order.
    async fn list_active_agents(&self, tenant_id: &str) -> Result<Vec<String>>;

    /// Open tickets grouped by non-null assignee.
    async fn count_open_tickets_by_agent(&self, tenant_id: &str) -> Result<HashMap<String, i64>>;

    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>>;
}

fn parse_tenant_row(row: PgRow) -> Tenant {
    Tenant {
        id: row.get("id"),
        name: row.get("name"),
        routing_mode: RoutingMode::parse(&row.get::<String, _>("routing_mode"))
            .unwrap_or(RoutingMode::Manual),
        wpp_session_name: row.get("wpp_session_name"),
        wpp_token: row.get("wpp_token"),
        agent_limit: row.get("agent_limit"),
        message_limit: row.get("message_limit"),
        message_usage: row.get("message_usage"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_ticket_row(row: PgRow) -> Ticket {
    Ticket {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        customer_number: row.get("customer_number"),
        status: TicketStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(TicketStatus::Waiting),
        assigned_to: row.get("assigned_to"),
        last_message: row.get("last_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_message_row(row: PgRow) -> TicketMessage {
    TicketMessage {
        id: row.get("id"),
        ticket_id: row.get("ticket_id"),
        tenant_id: row.get("tenant_id"),
        sender: SenderRole::parse(&row.get::<String, _>("sender")).unwrap_or(SenderRole::Customer),
        text: row.get("text"),
        created_at: row.get("created_at"),
    }
}

pub fn parse_agent_row(row: PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        email: row.get("email"),
        role: AgentRole::parse(&row.get::<String, _>("role")).unwrap_or(AgentRole::Agent),
        status: AgentStatus::parse(&row.get::<String, _>("status")).unwrap_or(AgentStatus::Inactive),
        created_at: row.get("created_at"),
    }
}

const TICKET_COLUMNS: &str =
    "id, tenant_id, customer_number, status, assigned_to, last_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgTicketStore {
    db: PgPool,
}

impl PgTicketStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, routing_mode, wpp_session_name, wpp_token, agent_limit, \
             message_limit, message_usage, created_at, updated_at \
             FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_tenant_row))
    }

    async fn find_open_ticket(
        &self,
        tenant_id: &str,
        customer_number: &str,
    ) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE tenant_id = $1 AND customer_number = $2 \
             AND status IN ('waiting', 'in_progress') LIMIT 1",
        ))
        .bind(tenant_id)
        .bind(customer_number)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_ticket_row))
    }

    async fn create_open_ticket(
        &self,
        tenant_id: &str,
        customer_number: &str,
        status: TicketStatus,
        assigned_to: Option<&str>,
        last_message: &str,
    ) -> Result<Ticket> {
        let now = now_iso();
        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            customer_number: customer_number.to_string(),
            status,
            assigned_to: assigned_to.map(|v| v.to_string()),
            last_message: last_message.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        let inserted = sqlx::query(
            "INSERT INTO tickets (id, tenant_id, customer_number, status, assigned_to, \
             last_message, created_at, updated_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&ticket.id)
        .bind(&ticket.tenant_id)
        .bind(&ticket.customer_number)
        .bind(ticket.status.as_str())
        .bind(&ticket.assigned_to)
        .bind(&ticket.last_message)
        .bind(&ticket.created_at)
        .bind(&ticket.updated_at)
        .execute(&self.db)
        .await;
        match inserted {
            Ok(_) => Ok(ticket),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Conflict("open ticket already exists for customer"))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn touch_open_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        last_message: &str,
    ) -> Result<Ticket> {
        let row = sqlx::query(&format!(
            "UPDATE tickets SET last_message = $1, updated_at = $2 \
             WHERE id = $3 AND tenant_id = $4 RETURNING {TICKET_COLUMNS}",
        ))
        .bind(last_message)
        .bind(now_iso())
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_ticket_row).ok_or(Error::NotFound("ticket"))
    }

    async fn get_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 AND tenant_id = $2",
        ))
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_ticket_row))
    }

    async fn claim_waiting_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        agent_id: &str,
    ) -> Result<Ticket> {
        let row = sqlx::query(&format!(
            "UPDATE tickets SET status = 'in_progress', assigned_to = $1, updated_at = $2 \
             WHERE id = $3 AND tenant_id = $4 AND status = 'waiting' \
             RETURNING {TICKET_COLUMNS}",
        ))
        .bind(agent_id)
        .bind(now_iso())
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        if let Some(row) = row {
            return Ok(parse_ticket_row(row));
        }
        match self.get_ticket(tenant_id, ticket_id).await? {
            None => Err(Error::NotFound("ticket")),
            Some(_) => Err(Error::Conflict("ticket is no longer waiting")),
        }
    }

    async fn assign_open_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        agent_id: &str,
    ) -> Result<Ticket> {
        let row = sqlx::query(&format!(
            "UPDATE tickets SET status = 'in_progress', assigned_to = $1, updated_at = $2 \
             WHERE id = $3 AND tenant_id = $4 AND status IN ('waiting', 'in_progress') \
             RETURNING {TICKET_COLUMNS}",
        ))
        .bind(agent_id)
        .bind(now_iso())
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        if let Some(row) = row {
            return Ok(parse_ticket_row(row));
        }
        match self.get_ticket(tenant_id, ticket_id).await? {
            None => Err(Error::NotFound("ticket")),
            Some(_) => Err(Error::Conflict("ticket is closed")),
        }
    }

    async fn close_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<(Ticket, bool)> {
        let row = sqlx::query(&format!(
            "UPDATE tickets SET status = 'closed', updated_at = $1 \
             WHERE id = $2 AND tenant_id = $3 AND status != 'closed' \
             RETURNING {TICKET_COLUMNS}",
        ))
        .bind(now_iso())
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        if let Some(row) = row {
            return Ok((parse_ticket_row(row), true));
        }
        match self.get_ticket(tenant_id, ticket_id).await? {
            Some(ticket) => Ok((ticket, false)),
            None => Err(Error::NotFound("ticket")),
        }
    }

    async fn append_message(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        sender: SenderRole,
        text: &str,
    ) -> Result<TicketMessage> {
        let message = TicketMessage {
            id: Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            tenant_id: tenant_id.to_string(),
            sender,
            text: text.to_string(),
            created_at: now_iso(),
        };
        sqlx::query(
            "INSERT INTO ticket_messages (id, ticket_id, tenant_id, sender, text, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&message.id)
        .bind(&message.ticket_id)
        .bind(&message.tenant_id)
        .bind(message.sender.as_str())
        .bind(&message.text)
        .bind(&message.created_at)
        .execute(&self.db)
        .await?;
        Ok(message)
    }

    async fn list_waiting(&self, tenant_id: &str) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE tenant_id = $1 AND status = 'waiting' ORDER BY created_at ASC",
        ))
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(parse_ticket_row).collect())
    }

    async fn list_assigned(&self, tenant_id: &str, agent_id: &str) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE tenant_id = $1 AND assigned_to = $2 AND status IN ('waiting', 'in_progress') \
             ORDER BY updated_at DESC",
        ))
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(parse_ticket_row).collect())
    }

    async fn list_messages(&self, tenant_id: &str, ticket_id: &str) -> Result<Vec<TicketMessage>> {
        let rows = sqlx::query(
            "SELECT id, ticket_id, tenant_id, sender, text, created_at FROM ticket_messages \
             WHERE ticket_id = $1 AND tenant_id = $2 ORDER BY created_at ASC",
        )
        .bind(ticket_id)
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(parse_message_row).collect())
    }

    async fn increment_message_usage(&self, tenant_id: &str) -> Result<()> {
        sqlx::query("UPDATE tenants SET message_usage = message_usage + 1 WHERE id = $1")
            .bind(tenant_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgAgentDirectory {
    db: PgPool,
}

impl PgAgentDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AgentDirectory for PgAgentDirectory {
    async fn list_active_agents(&self, tenant_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM agents \
             WHERE tenant_id = $1 AND role = 'agent' AND status = 'active' \
             ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn count_open_tickets_by_agent(&self, tenant_id: &str) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT assigned_to, COUNT(1) AS open_count FROM tickets \
             WHERE tenant_id = $1 AND status IN ('waiting', 'in_progress') \
             AND assigned_to IS NOT NULL GROUP BY assigned_to",
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let agent_id: String = row.get("assigned_to");
            let count: i64 = row.get("open_count");
            counts.insert(agent_id, count);
        }
        Ok(counts)
    }

    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, email, role, status, created_at \
             FROM agents WHERE id = $1 AND tenant_id = $2",
        )
        .bind(agent_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_agent_row))
    }
}
