use std::cmp::Ordering;

use crate::{
    catalog::Schema,
    error::Result,
    execution::{Executor, Expression, OrderByType, SortPlan},
    storage::Tuple,
    types::Rid,
};

/// Compare two rows under an order-by list. Equal ranks fall through to
/// the next key; fully equal rows keep their input order (the callers
/// sort stably).
pub(crate) fn compare_tuples(
    order_bys: &[(OrderByType, Expression)],
    schema: &Schema,
    a: &Tuple,
    b: &Tuple,
) -> Ordering {
    for (order, expr) in order_bys {
        let l = expr.evaluate(a, schema);
        let r = expr.evaluate(b, schema);
        let ord = l.sort_cmp(&r);
        if ord == Ordering::Equal {
            continue;
        }
        return match order {
            OrderByType::Asc => ord,
            OrderByType::Desc => ord.reverse(),
        };
    }
    Ordering::Equal
}

/// Full materialising sort.
pub struct SortExecutor {
    child: Box<dyn Executor>,
    order_bys: Vec<(OrderByType, Expression)>,
    output_schema: Schema,
    rows: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(plan: &SortPlan, child: Box<dyn Executor>) -> Self {
        Self {
            child,
            order_bys: plan.order_bys.clone(),
            output_schema: plan.output_schema.clone(),
            rows: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;

        self.rows.clear();
        while let Some(row) = self.child.next()? {
            self.rows.push(row);
        }

        let order_bys = self.order_bys.clone();
        let schema = self.output_schema.clone();
        self.rows
            .sort_by(|a, b| compare_tuples(&order_bys, &schema, &a.0, &b.0));

        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
