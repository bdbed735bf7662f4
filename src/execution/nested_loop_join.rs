use crate::{
    catalog::Schema,
    error::Result,
    execution::{Executor, Expression, JoinType, NestedLoopJoinPlan},
    storage::{Cell, Tuple},
    types::Rid,
};

/// Nested-loop join. The right child is materialised in `init`; each
/// left row is streamed against it. INNER drops unmatched left rows,
/// LEFT null-extends them.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Expression,
    join_type: JoinType,
    output_schema: Schema,
    right_tuples: Vec<Tuple>,
    left_tuple: Option<Tuple>,
    right_cursor: usize,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        plan: &NestedLoopJoinPlan,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        Self {
            left,
            right,
            predicate: plan.predicate.clone(),
            join_type: plan.join_type,
            output_schema: plan.output_schema.clone(),
            right_tuples: Vec::new(),
            left_tuple: None,
            right_cursor: 0,
            left_matched: false,
        }
    }

    fn null_extended(&self, left: &Tuple) -> Tuple {
        let nulls = Tuple::new(vec![Cell::Null; self.right.output_schema().column_count()]);
        Tuple::join(left, &nulls)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.right.init()?;
        self.left.init()?;

        self.right_tuples.clear();
        while let Some((tuple, _)) = self.right.next()? {
            self.right_tuples.push(tuple);
        }
        self.left_tuple = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if self.left_tuple.is_none() {
                match self.left.next()? {
                    Some((tuple, _)) => {
                        self.left_tuple = Some(tuple);
                        self.right_cursor = 0;
                        self.left_matched = false;
                    }
                    None => return Ok(None),
                }
            }
            let left = self.left_tuple.clone().expect("left tuple set above");

            while self.right_cursor < self.right_tuples.len() {
                let right = &self.right_tuples[self.right_cursor];
                self.right_cursor += 1;

                let matched = self.predicate.evaluate_join(
                    &left,
                    self.left.output_schema(),
                    right,
                    self.right.output_schema(),
                );
                if matched == Cell::Bool(true) {
                    self.left_matched = true;
                    return Ok(Some((Tuple::join(&left, right), Rid::INVALID)));
                }
            }

            // The right side is exhausted for this left row.
            let emit_null = self.join_type == JoinType::Left && !self.left_matched;
            self.left_tuple = None;
            if emit_null {
                return Ok(Some((self.null_extended(&left), Rid::INVALID)));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
