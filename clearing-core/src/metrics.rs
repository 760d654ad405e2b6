//! Prometheus metrics for the clearing engine

use prometheus::{IntCounter, IntGauge, Registry};

/// Engine metrics, registered against a dedicated registry so multiple
/// engine instances (tests) never collide on metric names.
pub struct Metrics {
    registry: Registry,

    /// Instructions accepted into the log
    pub instructions_registered_total: IntCounter,

    /// Cycles opened (bootstrap and successors)
    pub cycles_opened_total: IntCounter,

    /// Cycles closed and committed
    pub cycles_closed_total: IntCounter,

    /// Closure attempts rejected by the zero-sum check
    pub unbalanced_closures_total: IntCounter,

    /// Ledger pushes that failed after the cycle committed
    pub dispatch_failures_total: IntCounter,

    /// Sequence number of the currently open cycle (0 when none)
    pub open_cycle_sequence: IntGauge,
}

impl Metrics {
    /// Create the metric set and register it against a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let instructions_registered_total = IntCounter::new(
            "clearing_instructions_registered_total",
            "Instructions accepted into the append-only log",
        )?;
        let cycles_opened_total = IntCounter::new(
            "clearing_cycles_opened_total",
            "Cycles opened, including the bootstrap cycle",
        )?;
        let cycles_closed_total = IntCounter::new(
            "clearing_cycles_closed_total",
            "Cycles closed and committed",
        )?;
        let unbalanced_closures_total = IntCounter::new(
            "clearing_unbalanced_closures_total",
            "Closure attempts aborted by the zero-sum check",
        )?;
        let dispatch_failures_total = IntCounter::new(
            "clearing_dispatch_failures_total",
            "Ledger pushes that failed after the cycle committed",
        )?;
        let open_cycle_sequence = IntGauge::new(
            "clearing_open_cycle_sequence",
            "Sequence number of the currently open cycle",
        )?;

        registry.register(Box::new(instructions_registered_total.clone()))?;
        registry.register(Box::new(cycles_opened_total.clone()))?;
        registry.register(Box::new(cycles_closed_total.clone()))?;
        registry.register(Box::new(unbalanced_closures_total.clone()))?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;
        registry.register(Box::new(open_cycle_sequence.clone()))?;

        Ok(Self {
            registry,
            instructions_registered_total,
            cycles_opened_total,
            cycles_closed_total,
            unbalanced_closures_total,
            dispatch_failures_total,
            open_cycle_sequence,
        })
    }

    /// Registry backing the `/metrics` endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
