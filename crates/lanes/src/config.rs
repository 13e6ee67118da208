//! Lane namespace: per-lane concurrency defaults, hard ceilings and timers.

use std::collections::HashMap;
use std::time::Duration;

/// Lane names used by the daemon.
pub mod lanes {
    /// Serialized user-facing interaction.
    pub const MAIN: &str = "main";
    /// Scheduled and background work.
    pub const CRON: &str = "cron";
    /// Sub-agent fan-out.
    pub const SUBAGENT: &str = "subagent";
    /// Tool calls nested inside another task.
    pub const NESTED: &str = "nested";
    pub const HEARTBEAT: &str = "heartbeat";
    /// Messages between agents.
    pub const AGENT_MSG: &str = "agent_msg";
}

/// Settings for one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSpec {
    /// Default concurrency. 0 means unlimited.
    pub concurrency: usize,
    /// Ceiling that runtime reconfiguration can never exceed.
    pub hard_cap: Option<usize>,
    /// Force-cancel tasks that run longer than this.
    pub watchdog: Option<Duration>,
    /// Queue wait after which a task's `on_wait` callback fires.
    pub warn_after: Option<Duration>,
}

impl LaneSpec {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            hard_cap: None,
            watchdog: None,
            warn_after: None,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// A cap of 0 means "no cap".
    pub fn with_hard_cap(mut self, cap: usize) -> Self {
        self.hard_cap = (cap > 0).then_some(cap);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_warn_after(mut self, warn_after: Duration) -> Self {
        self.warn_after = Some(warn_after);
        self
    }

    /// Concurrency the lane starts with.
    pub fn initial_concurrency(&self) -> usize {
        clamp_concurrency(self.concurrency, self.hard_cap)
    }
}

/// Apply a hard ceiling to a requested limit (0 = unlimited).
///
/// An unlimited request on a capped lane resolves to the cap.
pub fn clamp_concurrency(requested: usize, hard_cap: Option<usize>) -> usize {
    match hard_cap {
        Some(cap) if requested == 0 || requested > cap => cap,
        _ => requested,
    }
}

/// Injected lane namespace. Lanes not listed get `default_spec`.
#[derive(Debug, Clone)]
pub struct LaneTable {
    specs: HashMap<String, LaneSpec>,
    default_spec: LaneSpec,
}

impl LaneTable {
    pub fn new(default_spec: LaneSpec) -> Self {
        Self {
            specs: HashMap::new(),
            default_spec,
        }
    }

    /// The table the daemon ships with.
    pub fn standard() -> Self {
        let mut table = Self::new(LaneSpec::new(4));
        table
            .insert(
                lanes::MAIN,
                LaneSpec::new(1).with_warn_after(Duration::from_secs(2)),
            )
            .insert(lanes::CRON, LaneSpec::unlimited())
            .insert(
                lanes::SUBAGENT,
                LaneSpec::new(5)
                    .with_hard_cap(10)
                    .with_watchdog(Duration::from_secs(30 * 60)),
            )
            .insert(
                lanes::NESTED,
                LaneSpec::new(3)
                    .with_hard_cap(3)
                    .with_watchdog(Duration::from_secs(10 * 60)),
            )
            .insert(
                lanes::HEARTBEAT,
                LaneSpec::new(1).with_watchdog(Duration::from_secs(5 * 60)),
            )
            .insert(lanes::AGENT_MSG, LaneSpec::new(4));
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: LaneSpec) -> &mut Self {
        self.specs.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LaneSpec> {
        self.specs.get(name)
    }

    pub fn spec_for(&self, name: &str) -> LaneSpec {
        self.specs
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_spec.clone())
    }

    pub fn default_spec(&self) -> &LaneSpec {
        &self.default_spec
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for LaneTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_within_cap() {
        assert_eq!(clamp_concurrency(2, Some(3)), 2);
        assert_eq!(clamp_concurrency(1000, Some(3)), 3);
        assert_eq!(clamp_concurrency(0, Some(3)), 3);
    }

    #[test]
    fn test_clamp_without_cap() {
        assert_eq!(clamp_concurrency(0, None), 0);
        assert_eq!(clamp_concurrency(50, None), 50);
    }

    #[test]
    fn test_zero_cap_means_none() {
        let spec = LaneSpec::new(2).with_hard_cap(0);
        assert_eq!(spec.hard_cap, None);
    }

    #[test]
    fn test_initial_concurrency_clamped() {
        let spec = LaneSpec::new(8).with_hard_cap(3);
        assert_eq!(spec.initial_concurrency(), 3);
    }

    #[test]
    fn test_standard_table() {
        let table = LaneTable::standard();
        assert_eq!(table.spec_for(lanes::MAIN).concurrency, 1);
        assert_eq!(table.spec_for(lanes::CRON).concurrency, 0);

        let subagent = table.spec_for(lanes::SUBAGENT);
        assert_eq!(subagent.concurrency, 5);
        assert_eq!(subagent.hard_cap, Some(10));

        let nested = table.spec_for(lanes::NESTED);
        assert_eq!(nested.initial_concurrency(), 3);
        assert_eq!(nested.hard_cap, Some(3));

        assert_eq!(table.spec_for(lanes::HEARTBEAT).concurrency, 1);
    }

    #[test]
    fn test_unknown_lane_gets_default() {
        let table = LaneTable::standard();
        let spec = table.spec_for("my-custom-lane");
        assert_eq!(spec, *table.default_spec());
        assert!(table.get("my-custom-lane").is_none());
    }

    #[test]
    fn test_insert_overrides() {
        let mut table = LaneTable::standard();
        table.insert(lanes::MAIN, LaneSpec::new(2));
        assert_eq!(table.spec_for(lanes::MAIN).concurrency, 2);
        assert!(table.names().contains(&"main".to_string()));
    }
}
