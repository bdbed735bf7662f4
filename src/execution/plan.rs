use crate::{
    catalog::Schema,
    execution::expression::Expression,
    storage::Cell,
    types::{IndexOid, TableOid},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug)]
pub struct SeqScanPlan {
    pub table_oid: TableOid,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct IndexScanPlan {
    pub index_oid: IndexOid,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct InsertPlan {
    pub table_oid: TableOid,
    pub child: Box<PlanNode>,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct DeletePlan {
    pub table_oid: TableOid,
    pub child: Box<PlanNode>,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct NestedLoopJoinPlan {
    pub left: Box<PlanNode>,
    pub right: Box<PlanNode>,
    pub predicate: Expression,
    pub join_type: JoinType,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct NestedIndexJoinPlan {
    pub child: Box<PlanNode>,
    pub index_oid: IndexOid,
    /// Evaluated against each outer row to form the probe key.
    pub key_expression: Expression,
    pub join_type: JoinType,
    pub inner_schema: Schema,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct AggregationPlan {
    pub child: Box<PlanNode>,
    pub group_bys: Vec<Expression>,
    pub aggregates: Vec<Expression>,
    pub agg_types: Vec<AggregationType>,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct SortPlan {
    pub child: Box<PlanNode>,
    pub order_bys: Vec<(OrderByType, Expression)>,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct LimitPlan {
    pub child: Box<PlanNode>,
    pub limit: usize,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct TopNPlan {
    pub child: Box<PlanNode>,
    pub order_bys: Vec<(OrderByType, Expression)>,
    pub n: usize,
    pub output_schema: Schema,
}

#[derive(Debug)]
pub struct ValuesPlan {
    pub rows: Vec<Vec<Cell>>,
    pub output_schema: Schema,
}

/// Algebraic plan tree consumed by the executor runtime and rewritten by
/// the optimizer.
#[derive(Debug)]
pub enum PlanNode {
    SeqScan(SeqScanPlan),
    IndexScan(IndexScanPlan),
    Insert(InsertPlan),
    Delete(DeletePlan),
    NestedLoopJoin(NestedLoopJoinPlan),
    NestedIndexJoin(NestedIndexJoinPlan),
    Aggregation(AggregationPlan),
    Sort(SortPlan),
    Limit(LimitPlan),
    TopN(TopNPlan),
    Values(ValuesPlan),
}

impl PlanNode {
    pub fn output_schema(&self) -> &Schema {
        match self {
            PlanNode::SeqScan(p) => &p.output_schema,
            PlanNode::IndexScan(p) => &p.output_schema,
            PlanNode::Insert(p) => &p.output_schema,
            PlanNode::Delete(p) => &p.output_schema,
            PlanNode::NestedLoopJoin(p) => &p.output_schema,
            PlanNode::NestedIndexJoin(p) => &p.output_schema,
            PlanNode::Aggregation(p) => &p.output_schema,
            PlanNode::Sort(p) => &p.output_schema,
            PlanNode::Limit(p) => &p.output_schema,
            PlanNode::TopN(p) => &p.output_schema,
            PlanNode::Values(p) => &p.output_schema,
        }
    }
}
