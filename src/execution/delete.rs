use std::sync::Arc;

use crate::{
    catalog::Schema,
    error::{Error, Result},
    execution::{acquire_row_lock, acquire_table_lock, Executor, ExecutorContext, DeletePlan},
    storage::{Cell, Tuple},
    transaction::LockMode,
    types::{Rid, TableOid},
};

/// Eager delete, the mirror of insert: drains the child, mark-deletes
/// each row and removes its key from every index, then yields the count.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    output_schema: Schema,
    child: Box<dyn Executor>,
    finished: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: &DeletePlan, child: Box<dyn Executor>) -> Self {
        Self {
            ctx,
            table_oid: plan.table_oid,
            output_schema: plan.output_schema.clone(),
            child,
            finished: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        acquire_table_lock(
            &self.ctx,
            LockMode::IntentionExclusive,
            self.table_oid,
            "delete",
        )
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.finished {
            return Ok(None);
        }

        let table = self
            .ctx
            .catalog
            .get_table(self.table_oid)
            .ok_or_else(|| Error::execution("delete: unknown table"))?;
        let indexes = self.ctx.catalog.get_table_indexes(&table.name);

        let mut count = 0i64;
        while let Some((tuple, rid)) = self.child.next()? {
            acquire_row_lock(&self.ctx, LockMode::Exclusive, self.table_oid, rid, "delete")?;

            if table.heap.mark_delete(rid) {
                for index in &indexes {
                    let key = index.key_of(&tuple)?;
                    index.index.remove(&key).map_err(|e| {
                        Error::execution(&format!("delete: index update failed: {}", e))
                    })?;
                }
                count += 1;
            }
        }

        self.finished = true;
        Ok(Some((Tuple::new(vec![Cell::Int64(count)]), Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
