use crate::models::records::{Batch, BatchStatus, Record, RecordId};
use crate::query::Query;
use crate::store::{EntityStore, QueryState};

impl EntityStore<Batch> {
    /// Batches of one farm, cached under `["batches", <farm id>]` so any batch
    /// mutation invalidates it together with the full list.
    pub fn for_farm(&self, farm_id: &RecordId) -> QueryState<Vec<Batch>> {
        let (column, ascending) = Batch::ORDER;
        let query = Query::all().eq("farm_id", farm_id.as_str()).order(column, ascending);
        self.query_with(&self.key().with(farm_id.as_str()), query)
    }

    pub fn active_bird_count(&self) -> QueryState<i64> {
        self.query().map(|batches| {
            batches
                .iter()
                .filter(|b| b.status == BatchStatus::Active)
                .map(|b| b.bird_count)
                .sum()
        })
    }
}
