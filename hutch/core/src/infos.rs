//! Info registry
//!
//! Named ambient animations rendered while the appliance is idle. Clients
//! set or replace an entry by `info_id` and clear it by sending the same id
//! with no payload. The registry itself is passive bookkeeping: the animator
//! asks it for the next entry each render pass, and entries rotate
//! round-robin in registration order.

use std::collections::HashMap;

use serde_json::Value;

/// Registered ambient animations, keyed by `info_id`.
#[derive(Debug, Default)]
pub struct InfoRegistry {
    entries: HashMap<String, Value>,
    order: Vec<String>,
    cursor: usize,
}

impl InfoRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an animation.
    ///
    /// Replacing an existing id keeps its place in the rotation; the new
    /// payload is picked up on that id's next render pass.
    pub fn set(&mut self, info_id: impl Into<String>, animation: Value) {
        let info_id = info_id.into();
        if self.entries.insert(info_id.clone(), animation).is_none() {
            self.order.push(info_id);
        }
    }

    /// Remove an entry. Clearing an id that is not registered is a no-op;
    /// the return value says whether anything was actually removed.
    pub fn clear(&mut self, info_id: &str) -> bool {
        if self.entries.remove(info_id).is_none() {
            return false;
        }
        if let Some(index) = self.order.iter().position(|id| id == info_id) {
            self.order.remove(index);
            if index < self.cursor {
                self.cursor -= 1;
            }
        }
        if self.cursor >= self.order.len() {
            self.cursor = 0;
        }
        true
    }

    /// Next `(info_id, payload)` to render, advancing the rotation.
    pub fn next_pass(&mut self) -> Option<(String, Value)> {
        if self.order.is_empty() {
            return None;
        }
        let index = self.cursor % self.order.len();
        let info_id = self.order[index].clone();
        let payload = self.entries.get(&info_id)?.clone();
        self.cursor = (index + 1) % self.order.len();
        Some((info_id, payload))
    }

    /// Whether an id is registered.
    pub fn contains(&self, info_id: &str) -> bool {
        self.entries.contains_key(info_id)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_clear_round_trip() {
        let mut infos = InfoRegistry::new();
        infos.set("weather", json!({"tempo": 25}));
        assert!(infos.contains("weather"));
        assert!(infos.clear("weather"));
        assert!(infos.is_empty());
    }

    #[test]
    fn clearing_an_unregistered_id_is_a_quiet_no_op() {
        let mut infos = InfoRegistry::new();
        assert!(!infos.clear("nothing-here"));
    }

    #[test]
    fn rotation_is_round_robin_in_registration_order() {
        let mut infos = InfoRegistry::new();
        infos.set("a", json!(1));
        infos.set("b", json!(2));
        infos.set("c", json!(3));

        let seen: Vec<String> = (0..6).filter_map(|_| infos.next_pass().map(|(id, _)| id)).collect();
        assert_eq!(seen, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn replacement_keeps_rotation_position_and_swaps_payload() {
        let mut infos = InfoRegistry::new();
        infos.set("a", json!(1));
        infos.set("b", json!("old"));
        infos.set("b", json!("new"));
        assert_eq!(infos.len(), 2);

        assert_eq!(infos.next_pass().unwrap().0, "a");
        let (id, payload) = infos.next_pass().unwrap();
        assert_eq!(id, "b");
        assert_eq!(payload, json!("new"));
    }

    #[test]
    fn removal_mid_rotation_keeps_the_cycle_fair() {
        let mut infos = InfoRegistry::new();
        infos.set("a", json!(1));
        infos.set("b", json!(2));
        infos.set("c", json!(3));

        assert_eq!(infos.next_pass().unwrap().0, "a");
        assert!(infos.clear("a"));

        let seen: Vec<String> = (0..4).filter_map(|_| infos.next_pass().map(|(id, _)| id)).collect();
        assert_eq!(seen, ["b", "c", "b", "c"]);
    }

    #[test]
    fn removing_the_entry_behind_the_cursor_does_not_skip_anyone() {
        let mut infos = InfoRegistry::new();
        infos.set("a", json!(1));
        infos.set("b", json!(2));
        infos.set("c", json!(3));

        assert_eq!(infos.next_pass().unwrap().0, "a");
        assert_eq!(infos.next_pass().unwrap().0, "b");
        assert!(infos.clear("a"));
        assert_eq!(infos.next_pass().unwrap().0, "c");
        assert_eq!(infos.next_pass().unwrap().0, "b");
    }

    #[test]
    fn a_single_entry_loops_on_itself() {
        let mut infos = InfoRegistry::new();
        infos.set("only", json!(null));
        assert_eq!(infos.next_pass().unwrap().0, "only");
        assert_eq!(infos.next_pass().unwrap().0, "only");
    }
}
