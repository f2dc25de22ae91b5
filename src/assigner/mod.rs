//! Auto-Assigner: min-load driver selection with roster-order tie-break.

use crate::store::{DriverRole, OrderStore};

pub type Result<T> = std::result::Result<T, crate::store::StoreError>;

/// Which leg of the delivery a caller is assigning a driver for.
pub type Phase = DriverRole;

/// Selects the driver carrying the least active load for `phase`, breaking
/// ties in roster order (first encountered wins). Does not write anything
/// to the store — callers fold the chosen driver into whatever transition
/// they are already making, the way the original auto-assigner only ever
/// set a field on the in-memory order and left the commit to its caller.
/// An empty roster is a no-op, logged as a warning.
pub async fn select_driver(store: &dyn OrderStore, roster: &[String], phase: Phase) -> Result<Option<String>> {
    if roster.is_empty() {
        tracing::warn!(?phase, "driver roster is empty, skipping auto-assignment");
        return Ok(None);
    }

    let loads = store.active_load_counts(phase).await?;
    let chosen = roster
        .iter()
        .min_by_key(|driver| loads.get(*driver).copied().unwrap_or(0))
        .expect("roster checked non-empty above");

    Ok(Some(chosen.clone()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    fn pick(roster: &[&str], loads: &HashMap<&str, i64>) -> Option<String> {
        roster
            .iter()
            .min_by_key(|driver| loads.get(*driver).copied().unwrap_or(0))
            .map(|s| s.to_string())
    }

    #[test]
    fn test_min_load_wins() {
        let roster = ["alice", "bob", "carol"];
        let loads = HashMap::from([("alice", 2), ("bob", 0), ("carol", 1)]);
        assert_eq!(pick(&roster, &loads), Some("bob".to_string()));
    }

    #[test]
    fn test_ties_break_by_roster_order() {
        let roster = ["alice", "bob", "carol"];
        let loads = HashMap::from([("alice", 1), ("bob", 1), ("carol", 0)]);
        // carol has the true minimum; confirm the disjoint tie case separately.
        assert_eq!(pick(&roster, &loads), Some("carol".to_string()));

        let tied = HashMap::from([("bob", 1), ("carol", 1)]);
        assert_eq!(pick(&roster, &tied), Some("alice".to_string()));
    }

    #[test]
    fn test_unassigned_driver_has_zero_load() {
        let roster = ["alice", "bob"];
        let loads = HashMap::from([("alice", 3)]);
        assert_eq!(pick(&roster, &loads), Some("bob".to_string()));
    }
}
