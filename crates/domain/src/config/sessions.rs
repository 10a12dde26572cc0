use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & agent loop limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Bounded depth of the per-session inbound event queue (§5). A second
    /// `user_query` while one is in flight is queued up to this depth;
    /// depth is effectively 1 per the busy-session policy.
    #[serde(default = "d_event_queue_depth")]
    pub event_queue_depth: usize,

    /// Hard ceiling on tool-call iterations within a single turn before
    /// the loop is truncated non-fatally (§4.3, `MAX_TOOL_LOOPS`).
    #[serde(default = "d_max_loop_iterations")]
    pub max_loop_iterations: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { event_queue_depth: d_event_queue_depth(), max_loop_iterations: d_max_loop_iterations() }
    }
}

fn d_event_queue_depth() -> usize {
    1
}
fn d_max_loop_iterations() -> u32 {
    25
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_loop_iterations_is_25() {
        assert_eq!(SessionsConfig::default().max_loop_iterations, 25);
    }

    #[test]
    fn default_queue_depth_is_one() {
        assert_eq!(SessionsConfig::default().event_queue_depth, 1);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: SessionsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_loop_iterations, 25);
    }
}
