use std::sync::Arc;

use crate::{
    btree::TreeIterator,
    catalog::Schema,
    error::{Error, Result},
    execution::{Executor, ExecutorContext, IndexScanPlan},
    storage::{TableHeap, Tuple},
    types::{IndexOid, Rid},
};

/// Walk the B+ tree in key order, dereferencing each rid into the
/// indexed table's heap.
pub struct IndexScanExecutor {
    ctx: Arc<ExecutorContext>,
    index_oid: IndexOid,
    output_schema: Schema,
    iter: Option<TreeIterator<i64>>,
    heap: Option<Arc<TableHeap>>,
}

impl IndexScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: &IndexScanPlan) -> Self {
        Self {
            ctx,
            index_oid: plan.index_oid,
            output_schema: plan.output_schema.clone(),
            iter: None,
            heap: None,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        let index_info = self
            .ctx
            .catalog
            .get_index(self.index_oid)
            .ok_or_else(|| Error::execution("index scan: unknown index"))?;
        let table = self
            .ctx
            .catalog
            .get_table_by_name(&index_info.table_name)
            .ok_or_else(|| Error::execution("index scan: indexed table is gone"))?;

        self.heap = Some(Arc::clone(&table.heap));
        self.iter = Some(index_info.index.iter()?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let iter = match self.iter.as_mut() {
            Some(iter) => iter,
            None => return Ok(None),
        };
        let heap = self.heap.as_ref().expect("init not called");

        for (_key, rid) in iter.by_ref() {
            // A row deleted since the entry was written is skipped.
            if let Some(tuple) = heap.get_tuple(rid) {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
