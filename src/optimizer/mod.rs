use crate::execution::plan::{
    AggregationPlan, DeletePlan, InsertPlan, LimitPlan, NestedIndexJoinPlan, NestedLoopJoinPlan,
    PlanNode, SortPlan, TopNPlan,
};

/// Post-order rewrite pass. The single rule: a limit directly above a
/// sort becomes a top-N with the sort's order and the limit's bound.
pub fn optimize(plan: PlanNode) -> PlanNode {
    let plan = optimize_children(plan);

    match plan {
        PlanNode::Limit(limit) => match *limit.child {
            PlanNode::Sort(sort) => PlanNode::TopN(TopNPlan {
                child: sort.child,
                order_bys: sort.order_bys,
                n: limit.limit,
                output_schema: limit.output_schema,
            }),
            child => PlanNode::Limit(LimitPlan {
                child: Box::new(child),
                limit: limit.limit,
                output_schema: limit.output_schema,
            }),
        },
        plan => plan,
    }
}

fn optimize_children(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Insert(InsertPlan {
            table_oid,
            child,
            output_schema,
        }) => PlanNode::Insert(InsertPlan {
            table_oid,
            child: Box::new(optimize(*child)),
            output_schema,
        }),
        PlanNode::Delete(DeletePlan {
            table_oid,
            child,
            output_schema,
        }) => PlanNode::Delete(DeletePlan {
            table_oid,
            child: Box::new(optimize(*child)),
            output_schema,
        }),
        PlanNode::NestedLoopJoin(NestedLoopJoinPlan {
            left,
            right,
            predicate,
            join_type,
            output_schema,
        }) => PlanNode::NestedLoopJoin(NestedLoopJoinPlan {
            left: Box::new(optimize(*left)),
            right: Box::new(optimize(*right)),
            predicate,
            join_type,
            output_schema,
        }),
        PlanNode::NestedIndexJoin(NestedIndexJoinPlan {
            child,
            index_oid,
            key_expression,
            join_type,
            inner_schema,
            output_schema,
        }) => PlanNode::NestedIndexJoin(NestedIndexJoinPlan {
            child: Box::new(optimize(*child)),
            index_oid,
            key_expression,
            join_type,
            inner_schema,
            output_schema,
        }),
        PlanNode::Aggregation(AggregationPlan {
            child,
            group_bys,
            aggregates,
            agg_types,
            output_schema,
        }) => PlanNode::Aggregation(AggregationPlan {
            child: Box::new(optimize(*child)),
            group_bys,
            aggregates,
            agg_types,
            output_schema,
        }),
        PlanNode::Sort(SortPlan {
            child,
            order_bys,
            output_schema,
        }) => PlanNode::Sort(SortPlan {
            child: Box::new(optimize(*child)),
            order_bys,
            output_schema,
        }),
        PlanNode::Limit(LimitPlan {
            child,
            limit,
            output_schema,
        }) => PlanNode::Limit(LimitPlan {
            child: Box::new(optimize(*child)),
            limit,
            output_schema,
        }),
        PlanNode::TopN(TopNPlan {
            child,
            order_bys,
            n,
            output_schema,
        }) => PlanNode::TopN(TopNPlan {
            child: Box::new(optimize(*child)),
            order_bys,
            n,
            output_schema,
        }),
        leaf @ (PlanNode::SeqScan(_) | PlanNode::IndexScan(_) | PlanNode::Values(_)) => leaf,
    }
}
