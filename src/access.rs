use crate::types::{AgentRole, Ticket, TicketStatus};

/// A ticket's messages may be sent by an admin of the tenant, or by the
/// current assignee while the ticket is still open.
pub fn can_send_reply(role: AgentRole, caller_id: &str, ticket: &Ticket) -> bool {
    if role == AgentRole::Admin {
        return true;
    }
    if ticket.status == TicketStatus::Closed {
        return false;
    }
    ticket.assigned_to.as_deref() == Some(caller_id)
}

/// Admins assign freely. An agent may claim an unassigned waiting ticket for
/// themselves; that is the "claim" operation behind the queue UI.
pub fn can_assign(role: AgentRole, caller_id: &str, ticket: &Ticket, target_agent_id: &str) -> bool {
    if role == AgentRole::Admin {
        return true;
    }
    ticket.status == TicketStatus::Waiting
        && ticket.assigned_to.is_none()
        && target_agent_id == caller_id
}

/// A ticket may be closed by an admin or by its current assignee.
pub fn can_close(role: AgentRole, caller_id: &str, ticket: &Ticket) -> bool {
    if role == AgentRole::Admin {
        return true;
    }
    ticket.assigned_to.as_deref() == Some(caller_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(status: TicketStatus, assigned_to: Option<&str>) -> Ticket {
        Ticket {
            id: "t-1".to_string(),
            tenant_id: "org-1".to_string(),
            customer_number: "+5511999999999".to_string(),
            status,
            assigned_to: assigned_to.map(|v| v.to_string()),
            last_message: "hi".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn assignee_can_reply_while_open() {
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(can_send_reply(AgentRole::Agent, "d", &tk));
    }

    #[test]
    fn other_agent_cannot_reply() {
        // Scenario E: agent C replies on a ticket assigned to agent D.
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(!can_send_reply(AgentRole::Agent, "c", &tk));
    }

    #[test]
    fn admin_can_always_reply() {
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(can_send_reply(AgentRole::Admin, "someone-else", &tk));
    }

    #[test]
    fn assignee_cannot_reply_after_close() {
        let tk = ticket(TicketStatus::Closed, Some("d"));
        assert!(!can_send_reply(AgentRole::Agent, "d", &tk));
    }

    #[test]
    fn agent_may_claim_unassigned_waiting_ticket() {
        let tk = ticket(TicketStatus::Waiting, None);
        assert!(can_assign(AgentRole::Agent, "c", &tk, "c"));
    }

    #[test]
    fn agent_may_not_assign_to_someone_else() {
        let tk = ticket(TicketStatus::Waiting, None);
        assert!(!can_assign(AgentRole::Agent, "c", &tk, "d"));
    }

    #[test]
    fn agent_may_not_steal_assigned_ticket() {
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(!can_assign(AgentRole::Agent, "c", &tk, "c"));
    }

    #[test]
    fn admin_may_reassign() {
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(can_assign(AgentRole::Admin, "boss", &tk, "c"));
    }

    #[test]
    fn close_requires_admin_or_assignee() {
        let tk = ticket(TicketStatus::InProgress, Some("d"));
        assert!(can_close(AgentRole::Agent, "d", &tk));
        assert!(!can_close(AgentRole::Agent, "c", &tk));
        assert!(can_close(AgentRole::Admin, "boss", &tk));
    }
}
