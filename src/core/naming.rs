// route-table name allocation
use std::collections::BTreeMap;

use crate::core::types::{MappingRecord, Tenant};

/// account -> series -> highest subseries allocated.
///
/// Never persisted: always refolded from the mapping table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingCounter {
    by_account: BTreeMap<String, BTreeMap<u32, u32>>,
}

impl NamingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single fold over persisted records. Names that do not follow the
    /// tenant's series scheme (the on-prem sentinel, foreign tables) are ignored.
    pub fn from_records<'a>(
        tenant: &Tenant,
        records: impl IntoIterator<Item = &'a MappingRecord>,
    ) -> Self {
        let mut counters = Self::new();
        for rec in records {
            counters.observe(tenant, &rec.account_id, &rec.route_table);
        }
        counters
    }

    /// Record a name (persisted or freshly allocated) so later allocations see it.
    pub fn observe(&mut self, tenant: &Tenant, account: &str, rtb_name: &str) -> bool {
        let Some((series, subseries)) = tenant.series_of(rtb_name) else {
            return false;
        };
        let highest = self
            .by_account
            .entry(account.to_string())
            .or_default()
            .entry(series)
            .or_insert(0);
        if subseries > *highest {
            *highest = subseries;
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.by_account.values().all(|series| series.is_empty())
    }

    pub fn series_for(&self, account: &str) -> Option<&BTreeMap<u32, u32>> {
        self.by_account.get(account).filter(|series| !series.is_empty())
    }

    pub fn max_series(&self) -> Option<u32> {
        self.by_account
            .values()
            .flat_map(|series| series.keys().copied())
            .max()
    }
}

/// Pick the `(series, subseries)` for the next table owned by `account`.
///
/// - nothing allocated yet: `(1, 1)`
/// - account known: grow the series holding its highest subseries (ties go
///   to the higher series)
/// - account unseen: open `max series + 1` at subseries 1
pub fn next_series(account: &str, counters: &NamingCounter) -> (u32, u32) {
    if counters.is_empty() {
        return (1, 1);
    }

    if let Some(series) = counters.series_for(account) {
        let mut target_series = 0;
        let mut max_sub = 0;
        for (&s, &sub) in series {
            if sub > max_sub || (sub == max_sub && s > target_series) {
                max_sub = sub;
                target_series = s;
            }
        }
        return (target_series.max(1), max_sub + 1);
    }

    (counters.max_series().unwrap_or(0) + 1, 1)
}

/// Pure allocation: the caller must [`NamingCounter::observe`] the result
/// before allocating again.
pub fn allocate(tenant: &Tenant, account: &str, counters: &NamingCounter) -> String {
    let (series, subseries) = next_series(account, counters);
    tenant.route_table_name(series, subseries)
}
