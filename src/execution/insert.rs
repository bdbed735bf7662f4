use std::sync::Arc;

use crate::{
    catalog::Schema,
    error::{Error, Result},
    execution::{acquire_row_lock, acquire_table_lock, Executor, ExecutorContext, InsertPlan},
    storage::{Cell, Tuple},
    transaction::LockMode,
    types::{Rid, TableOid},
};

/// Eager insert: the first `next` call drains the child, inserting every
/// row into the heap and all of the table's indexes, and yields one row
/// with the insert count.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table_oid: TableOid,
    output_schema: Schema,
    child: Box<dyn Executor>,
    finished: bool,
}

impl InsertExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, plan: &InsertPlan, child: Box<dyn Executor>) -> Self {
        Self {
            ctx,
            table_oid: plan.table_oid,
            output_schema: plan.output_schema.clone(),
            child,
            finished: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        acquire_table_lock(
            &self.ctx,
            LockMode::IntentionExclusive,
            self.table_oid,
            "insert",
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
            .ok_or_else(|| Error::execution("insert: unknown table"))?;
        let indexes = self.ctx.catalog.get_table_indexes(&table.name);

        let mut count = 0i64;
        while let Some((tuple, _)) = self.child.next()? {
            let rid = table.heap.insert_tuple(tuple.clone());
            acquire_row_lock(&self.ctx, LockMode::Exclusive, self.table_oid, rid, "insert")?;

            for index in &indexes {
                let key = index.key_of(&tuple)?;
                index
                    .index
                    .insert(&key, rid)
                    .map_err(|e| Error::execution(&format!("insert: index update failed: {}", e)))?;
            }
            count += 1;
        }

        self.finished = true;
        Ok(Some((Tuple::new(vec![Cell::Int64(count)]), Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
