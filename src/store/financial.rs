//! Financial overview: monthly figures plus the cost breakdown, read together.

use crate::models::records::{CostBreakdown, FinancialData};
use crate::store::{EntityStore, QueryState, StoreContext};

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialOverview {
    pub financial: QueryState<Vec<FinancialData>>,
    pub costs: QueryState<Vec<CostBreakdown>>,
}

impl FinancialOverview {
    pub fn is_loading(&self) -> bool {
        self.financial.is_loading || self.costs.is_loading
    }

    pub fn is_error(&self) -> bool {
        self.financial.is_error || self.costs.is_error
    }

    /// Stored revenue of every month, summed. Profit and margin are shown as stored.
    pub fn total_revenue(&self) -> f64 {
        self.financial.data.iter().map(|r| r.revenue).sum()
    }
}

#[derive(Clone)]
pub struct FinancialStore {
    pub financial: EntityStore<FinancialData>,
    /// Read-only from the dashboard.
    costs: EntityStore<CostBreakdown>,
}

impl FinancialStore {
    pub fn new(ctx: StoreContext) -> Self {
        FinancialStore {
            financial: EntityStore::new(ctx.clone()),
            costs: EntityStore::new(ctx),
        }
    }

    pub fn overview(&self) -> FinancialOverview {
        FinancialOverview {
            financial: self.financial.query(),
            costs: self.costs.query(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ErrorKind;
    use crate::models::records::NewFinancialData;
    use crate::store::testing::Harness;
    use serde_json::json;

    #[test]
    fn overview_reads_both_collections() {
        let h = Harness::operator();
        h.backend
            .seed_row("cost_breakdown", json!({"name": "Feed", "value": 65, "amount": 1250000}))
            .unwrap();
        let store = FinancialStore::new(h.ctx.clone());
        store
            .financial
            .create(&NewFinancialData {
                month: "Jan".into(),
                revenue: 2_400_000.0,
                cost: 1_900_000.0,
                // stored as given, never recomputed
                profit: 123.0,
                margin: 99.0,
            })
            .unwrap();

        let overview = store.overview();
        assert!(!overview.is_loading());
        assert!(!overview.is_error());
        assert_eq!(overview.costs.data[0].name, "Feed");
        assert_eq!(overview.financial.data[0].profit, 123.0);
        assert_eq!(overview.total_revenue(), 2_400_000.0);
    }

    #[test]
    fn missing_cost_table_only_fails_that_half() {
        let h = Harness::operator();
        h.backend.drop_table("cost_breakdown");
        let overview = FinancialStore::new(h.ctx.clone()).overview();
        assert!(overview.is_error());
        assert!(!overview.financial.is_error);
        assert_eq!(overview.costs.error.map(|e| e.kind), Some(ErrorKind::MissingTable));
    }
}
