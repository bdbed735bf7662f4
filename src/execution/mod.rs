pub mod aggregation;
pub mod delete;
pub mod expression;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod plan;
pub mod seq_scan;
pub mod sort;
pub mod topn;
pub mod values;

pub use expression::{ComparisonOp, Expression};
pub use plan::{
    AggregationPlan, AggregationType, DeletePlan, IndexScanPlan, InsertPlan, JoinType, LimitPlan,
    NestedIndexJoinPlan, NestedLoopJoinPlan, OrderByType, PlanNode, SeqScanPlan, SortPlan,
    TopNPlan, ValuesPlan,
};

use std::sync::Arc;

use crate::{
    catalog::{Catalog, Schema},
    error::{Error, Result},
    storage::Tuple,
    transaction::{LockManager, LockMode, Transaction},
    types::{Rid, TableOid},
};

/// Everything an executor needs from its surroundings.
pub struct ExecutorContext {
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        txn: Arc<Transaction>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            lock_manager,
            txn,
        })
    }
}

/// Pull-based executor: `init` prepares, `next` yields one row per call
/// until `None`.
pub trait Executor {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>>;
    fn output_schema(&self) -> &Schema;
}

/// Wrap a plan tree in its executor tree.
pub fn build_executor(ctx: Arc<ExecutorContext>, plan: &PlanNode) -> Box<dyn Executor> {
    match plan {
        PlanNode::SeqScan(p) => Box::new(seq_scan::SeqScanExecutor::new(ctx, p)),
        PlanNode::IndexScan(p) => Box::new(index_scan::IndexScanExecutor::new(ctx, p)),
        PlanNode::Insert(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(insert::InsertExecutor::new(ctx, p, child))
        }
        PlanNode::Delete(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(delete::DeleteExecutor::new(ctx, p, child))
        }
        PlanNode::NestedLoopJoin(p) => {
            let left = build_executor(Arc::clone(&ctx), &p.left);
            let right = build_executor(Arc::clone(&ctx), &p.right);
            Box::new(nested_loop_join::NestedLoopJoinExecutor::new(p, left, right))
        }
        PlanNode::NestedIndexJoin(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(nested_index_join::NestedIndexJoinExecutor::new(ctx, p, child))
        }
        PlanNode::Aggregation(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(aggregation::AggregationExecutor::new(p, child))
        }
        PlanNode::Sort(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(sort::SortExecutor::new(p, child))
        }
        PlanNode::Limit(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(limit::LimitExecutor::new(p, child))
        }
        PlanNode::TopN(p) => {
            let child = build_executor(Arc::clone(&ctx), &p.child);
            Box::new(topn::TopNExecutor::new(p, child))
        }
        PlanNode::Values(p) => Box::new(values::ValuesExecutor::new(p)),
    }
}

/// Build, init, and drain a plan.
pub fn execute(ctx: Arc<ExecutorContext>, plan: &PlanNode) -> Result<Vec<Tuple>> {
    let mut executor = build_executor(ctx, plan);
    executor.init()?;
    let mut out = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        out.push(tuple);
    }
    Ok(out)
}

/// Take a table lock for an executor, mapping lock failures to execution
/// errors.
pub(crate) fn acquire_table_lock(
    ctx: &ExecutorContext,
    mode: LockMode,
    oid: TableOid,
    who: &str,
) -> Result<()> {
    match ctx.lock_manager.lock_table(&ctx.txn, mode, oid) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::execution(&format!(
            "{}: transaction aborted while locking table {}",
            who, oid
        ))),
        Err(e) => Err(Error::execution(&format!(
            "{}: failed to lock table {}: {}",
            who, oid, e
        ))),
    }
}

pub(crate) fn acquire_row_lock(
    ctx: &ExecutorContext,
    mode: LockMode,
    oid: TableOid,
    rid: Rid,
    who: &str,
) -> Result<()> {
    match ctx.lock_manager.lock_row(&ctx.txn, mode, oid, rid) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::execution(&format!(
            "{}: transaction aborted while locking {}",
            who, rid
        ))),
        Err(e) => Err(Error::execution(&format!(
            "{}: failed to lock {}: {}",
            who, rid, e
        ))),
    }
}
