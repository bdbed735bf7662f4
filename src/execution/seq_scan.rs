use std::sync::Arc;

use crate::{
    catalog::Schema,
    error::{Error, Result},
    execution::{acquire_row_lock, acquire_table_lock, Executor, ExecutorContext, SeqScanPlan},
    storage::Tuple,
    transaction::{IsolationLevel, LockMode},
    types::{Rid, TableOid},
};

/// Full scan over a table heap. Takes IS on the table and S on each row
/// before yielding it, except under read-uncommitted.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    output_schema: Schema,
    rows: Vec<(Rid, Tuple)>,
    cursor: usize,
}

impl SeqScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: &SeqScanPlan) -> Self {
        Self {
            ctx,
            table_oid: plan.table_oid,
            output_schema: plan.output_schema.clone(),
            rows: Vec::new(),
            cursor: 0,
        }
    }

    fn locking(&self) -> bool {
        self.ctx.txn.isolation_level() != IsolationLevel::ReadUncommitted
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.locking() {
            acquire_table_lock(
                &self.ctx,
                LockMode::IntentionShared,
                self.table_oid,
                "seq scan",
            )?;
        }

        let table = self
            .ctx
            .catalog
            .get_table(self.table_oid)
            .ok_or_else(|| Error::execution("seq scan: unknown table"))?;
        self.rows = table.heap.scan();
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }

        let (rid, tuple) = self.rows[self.cursor].clone();
        self.cursor += 1;

        if self.locking() {
            acquire_row_lock(&self.ctx, LockMode::Shared, self.table_oid, rid, "seq scan")?;
        }
        Ok(Some((tuple, rid)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
