use std::collections::HashMap;

use crate::types::RoutingMode;

/// Pick an assignee for a new ticket, or None for the waiting queue.
///
/// `manual` never assigns. `auto` and `hybrid` both pick the least-loaded
/// active agent; they differ only in how the console presents the waiting
/// queue, not in assignment mechanics. Ties break on list order, which the
/// directory keeps stable (creation order), so the first agent encountered
/// with the minimum load wins.
pub fn select_assignee(
    mode: RoutingMode,
    active_agents: &[String],
    open_counts: &HashMap<String, i64>,
) -> Option<String> {
    if mode == RoutingMode::Manual {
        return None;
    }

    let mut selected: Option<(&String, i64)> = None;
    for agent_id in active_agents {
        let count = open_counts.get(agent_id).copied().unwrap_or(0);
        match selected {
            Some((_, best)) if best <= count => {}
            _ => selected = Some((agent_id, count)),
        }
    }
    selected.map(|(agent_id, _)| agent_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs
            .iter()
            .map(|(id, n)| (id.to_string(), *n))
            .collect::<HashMap<_, _>>()
    }

    fn agents(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn manual_mode_never_assigns() {
        let result = select_assignee(
            RoutingMode::Manual,
            &agents(&["a", "b"]),
            &counts(&[("a", 0), ("b", 0)]),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn auto_picks_least_loaded() {
        let result = select_assignee(
            RoutingMode::Auto,
            &agents(&["a", "b", "c"]),
            &counts(&[("a", 3), ("b", 1), ("c", 2)]),
        );
        assert_eq!(result, Some("b".to_string()));
    }

    #[test]
    fn tie_breaks_on_first_listed() {
        let result = select_assignee(
            RoutingMode::Auto,
            &agents(&["a", "b", "c"]),
            &counts(&[("a", 2), ("b", 2), ("c", 2)]),
        );
        assert_eq!(result, Some("a".to_string()));
    }

    #[test]
    fn missing_count_is_zero_load() {
        let result = select_assignee(
            RoutingMode::Hybrid,
            &agents(&["a", "b"]),
            &counts(&[("a", 1)]),
        );
        assert_eq!(result, Some("b".to_string()));
    }

    #[test]
    fn hybrid_matches_auto() {
        let active = agents(&["a", "b"]);
        let load = counts(&[("a", 5), ("b", 0)]);
        assert_eq!(
            select_assignee(RoutingMode::Auto, &active, &load),
            select_assignee(RoutingMode::Hybrid, &active, &load),
        );
    }

    #[test]
    fn empty_directory_returns_none() {
        let result = select_assignee(RoutingMode::Auto, &[], &HashMap::new());
        assert_eq!(result, None);
    }
}
