use std::sync::Arc;

use crate::{
    catalog::{IndexInfo, Schema},
    error::{Error, Result},
    execution::{Executor, ExecutorContext, Expression, JoinType, NestedIndexJoinPlan},
    storage::{Cell, TableHeap, Tuple},
    types::{IndexOid, Rid},
};

/// Index join: for each outer row, evaluate the key expression and probe
/// the inner table's unique index. At most one inner match exists per
/// outer row.
pub struct NestedIndexJoinExecutor {
    ctx: Arc<ExecutorContext>,
    index_oid: IndexOid,
    key_expression: Expression,
    join_type: JoinType,
    inner_schema: Schema,
    output_schema: Schema,
    child: Box<dyn Executor>,
    index_info: Option<Arc<IndexInfo>>,
    heap: Option<Arc<TableHeap>>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        plan: &NestedIndexJoinPlan,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            ctx,
            index_oid: plan.index_oid,
            key_expression: plan.key_expression.clone(),
            join_type: plan.join_type,
            inner_schema: plan.inner_schema.clone(),
            output_schema: plan.output_schema.clone(),
            child,
            index_info: None,
            heap: None,
        }
    }

    fn null_extended(&self, left: &Tuple) -> Tuple {
        let nulls = Tuple::new(vec![Cell::Null; self.inner_schema.column_count()]);
        Tuple::join(left, &nulls)
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;

        let index_info = self
            .ctx
            .catalog
            .get_index(self.index_oid)
            .ok_or_else(|| Error::execution("index join: unknown index"))?;
        let table = self
            .ctx
            .catalog
            .get_table_by_name(&index_info.table_name)
            .ok_or_else(|| Error::execution("index join: indexed table is gone"))?;

        self.heap = Some(Arc::clone(&table.heap));
        self.index_info = Some(index_info);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let index_info = Arc::clone(self.index_info.as_ref().expect("init not called"));
        let heap = Arc::clone(self.heap.as_ref().expect("init not called"));

        loop {
            let left = match self.child.next()? {
                Some((tuple, _)) => tuple,
                None => return Ok(None),
            };

            let key_cell = self
                .key_expression
                .evaluate(&left, self.child.output_schema());

            let matched = match key_cell.as_i64() {
                Some(key) => index_info
                    .index
                    .get_value(&key)
                    .map_err(|e| Error::execution(&format!("index join: probe failed: {}", e)))?
                    .and_then(|rid| heap.get_tuple(rid).map(|tuple| (tuple, rid))),
                // A null key matches nothing.
                None => None,
            };

            match matched {
                Some((right, rid)) => {
                    return Ok(Some((Tuple::join(&left, &right), rid)));
                }
                None => {
                    if self.join_type == JoinType::Left {
                        return Ok(Some((self.null_extended(&left), Rid::INVALID)));
                    }
                }
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
