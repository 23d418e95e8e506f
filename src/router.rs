use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::gateway::MessageGateway;
use crate::notify::EventNotifier;
use crate::routing::select_assignee;
use crate::store::{AgentDirectory, TicketStore};
use crate::types::{
    AgentStatus, RouteOutcome, RoutingMode, SenderRole, Tenant, Ticket, TicketMessage,
    TicketStatus,
};

/// Orchestrates the ticket lifecycle: one inbound message becomes a
/// consistent ticket state plus a set of emitted events. All tenant context
/// is passed explicitly; there is no process-wide routing state.
pub struct TicketRouter {
    store: Arc<dyn TicketStore>,
    directory: Arc<dyn AgentDirectory>,
    notifier: Arc<dyn EventNotifier>,
    gateway: Arc<dyn MessageGateway>,
}

impl TicketRouter {
    pub fn new(
        store: Arc<dyn TicketStore>,
        directory: Arc<dyn AgentDirectory>,
        notifier: Arc<dyn EventNotifier>,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            gateway,
        }
    }

    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    /// Attach an inbound customer message to its open ticket, creating and
    /// routing a new ticket when none exists.
    pub async fn route_inbound_message(
        &self,
        tenant_id: &str,
        customer_number: &str,
        text: &str,
    ) -> Result<RouteOutcome> {
        let customer_number = customer_number.trim();
        let text = text.trim();
        if customer_number.is_empty() {
            return Err(Error::InvalidInput("customerId is required".to_string()));
        }
        if text.is_empty() {
            return Err(Error::InvalidInput("text is required".to_string()));
        }

        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or(Error::NotFound("tenant"))?;
        check_message_quota(&tenant)?;

        if let Some(existing) = self
            .store
            .find_open_ticket(tenant_id, customer_number)
            .await?
        {
            return self.attach_to_ticket(existing, text).await;
        }

        let candidate = self.pick_assignee(&tenant).await;
        let (status, assigned_to) = match &candidate {
            Some(agent_id) => (TicketStatus::InProgress, Some(agent_id.as_str())),
            None => (TicketStatus::Waiting, None),
        };

        let ticket = match self
            .store
            .create_open_ticket(tenant_id, customer_number, status, assigned_to, text)
            .await
        {
            Ok(ticket) => ticket,
            // Lost the open-ticket uniqueness race to a concurrent webhook;
            // the winner's ticket is the one to attach to.
            Err(Error::Conflict(_)) => {
                let existing = self
                    .store
                    .find_open_ticket(tenant_id, customer_number)
                    .await?
                    .ok_or(Error::Conflict("open ticket raced and closed"))?;
                return self.attach_to_ticket(existing, text).await;
            }
            Err(err) => return Err(err),
        };

        let message = self
            .store
            .append_message(tenant_id, &ticket.id, SenderRole::Customer, text)
            .await?;

        tracing::info!(
            tenant_id,
            ticket_id = %ticket.id,
            routing_mode = tenant.routing_mode.as_str(),
            assigned_to = ?ticket.assigned_to,
            "ticket routed"
        );

        self.notifier
            .emit(tenant_id, "ticket:new", json!({ "ticket": ticket }))
            .await;
        if let Some(agent_id) = &ticket.assigned_to {
            self.notifier
                .emit(
                    tenant_id,
                    "ticket:assigned",
                    json!({ "ticket": ticket, "agentId": agent_id }),
                )
                .await;
        } else {
            self.notifier
                .emit(tenant_id, "ticket:waiting", json!({ "ticket": ticket }))
                .await;
        }
        self.notifier
            .emit(
                tenant_id,
                "message:received",
                json!({ "ticketId": ticket.id, "message": message }),
            )
            .await;
        self.bump_usage(tenant_id);

        let was_assigned = ticket.assigned_to.is_some();
        Ok(RouteOutcome {
            ticket,
            message,
            was_assigned,
            is_new_ticket: true,
        })
    }

    async fn attach_to_ticket(&self, existing: Ticket, text: &str) -> Result<RouteOutcome> {
        let tenant_id = existing.tenant_id.clone();
        let ticket = self
            .store
            .touch_open_ticket(&tenant_id, &existing.id, text)
            .await?;
        let message = self
            .store
            .append_message(&tenant_id, &ticket.id, SenderRole::Customer, text)
            .await?;
        self.notifier
            .emit(
                &tenant_id,
                "message:received",
                json!({ "ticketId": ticket.id, "message": message }),
            )
            .await;
        self.bump_usage(&tenant_id);
        Ok(RouteOutcome {
            ticket,
            message,
            was_assigned: false,
            is_new_ticket: false,
        })
    }

    /// Snapshot the directory and apply the routing policy. A directory
    /// failure falls open to the waiting queue instead of failing the
    /// whole request; only the primary ticket/message writes are fatal.
    async fn pick_assignee(&self, tenant: &Tenant) -> Option<String> {
        if tenant.routing_mode == RoutingMode::Manual {
            return None;
        }
        let snapshot = async {
            let agents = self.directory.list_active_agents(&tenant.id).await?;
            let counts = self
                .directory
                .count_open_tickets_by_agent(&tenant.id)
                .await?;
            Ok::<_, Error>((agents, counts))
        }
        .await;
        match snapshot {
            Ok((agents, counts)) => select_assignee(tenant.routing_mode, &agents, &counts),
            Err(err) => {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    error = %err,
                    "agent directory unavailable, ticket falls to waiting queue"
                );
                None
            }
        }
    }

    /// Assign or claim a ticket. The claim path is a compare-and-swap on
    /// `waiting`; concurrent claimers get exactly one success and one
    /// `Conflict`. Admin callers may also reassign in_progress tickets.
    pub async fn assign_ticket(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        agent_id: &str,
        allow_reassign: bool,
    ) -> Result<Ticket> {
        let agent = self
            .directory
            .get_agent(tenant_id, agent_id)
            .await?
            .ok_or(Error::NotFound("agent"))?;
        if agent.status != AgentStatus::Active {
            return Err(Error::InvalidInput(format!(
                "agent {} is not active",
                agent.id
            )));
        }

        let ticket = if allow_reassign {
            self.store
                .assign_open_ticket(tenant_id, ticket_id, agent_id)
                .await?
        } else {
            self.store
                .claim_waiting_ticket(tenant_id, ticket_id, agent_id)
                .await?
        };
        self.notifier
            .emit(
                tenant_id,
                "ticket:assigned",
                json!({ "ticket": ticket, "agentId": agent_id }),
            )
            .await;
        Ok(ticket)
    }

    /// Terminal and idempotent; `assigned_to` is kept as history. The
    /// event fires only on the first transition.
    pub async fn close_ticket(&self, tenant_id: &str, ticket_id: &str) -> Result<Ticket> {
        let (ticket, transitioned) = self.store.close_ticket(tenant_id, ticket_id).await?;
        if transitioned {
            self.notifier
                .emit(tenant_id, "ticket:closed", json!({ "ticket": ticket }))
                .await;
        }
        Ok(ticket)
    }

    /// Persist an agent reply and attempt outbound delivery. Delivery is
    /// at-least-once from the ticket history's point of view: a failed send
    /// is returned as a warning and never rolls back the stored message.
    pub async fn send_reply(
        &self,
        tenant_id: &str,
        ticket_id: &str,
        text: &str,
    ) -> Result<(Ticket, TicketMessage, Option<String>)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("text is required".to_string()));
        }
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or(Error::NotFound("tenant"))?;
        check_message_quota(&tenant)?;

        let ticket = self
            .store
            .touch_open_ticket(tenant_id, ticket_id, text)
            .await?;
        let message = self
            .store
            .append_message(tenant_id, ticket_id, SenderRole::Agent, text)
            .await?;
        self.notifier
            .emit(
                tenant_id,
                "message:received",
                json!({ "ticketId": ticket.id, "message": message }),
            )
            .await;
        self.bump_usage(tenant_id);

        let delivery_error = match self
            .gateway
            .send(
                &tenant.wpp_session_name,
                &tenant.wpp_token,
                &ticket.customer_number,
                text,
            )
            .await
        {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    tenant_id,
                    ticket_id = %ticket.id,
                    error = %err,
                    "outbound delivery failed, message kept in history"
                );
                Some(err.to_string())
            }
        };

        Ok((ticket, message, delivery_error))
    }

    fn bump_usage(&self, tenant_id: &str) {
        let store = self.store.clone();
        let tenant_id = tenant_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store.increment_message_usage(&tenant_id).await {
                tracing::warn!(error = %err, %tenant_id, "usage counter increment failed");
            }
        });
    }
}

fn check_message_quota(tenant: &Tenant) -> Result<()> {
    if let Some(limit) = tenant.message_limit {
        if tenant.message_usage >= limit {
            return Err(Error::QuotaExceeded {
                resource: "message",
            });
        }
    }
    Ok(())
}
