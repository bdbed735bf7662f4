use crate::{
    catalog::Schema,
    error::Result,
    execution::{Executor, LimitPlan},
    storage::Tuple,
    types::Rid,
};

/// Pass through the first `limit` rows of the child. Plans that pair a
/// limit with a sort are normally rewritten to top-N before reaching
/// here.
pub struct LimitExecutor {
    child: Box<dyn Executor>,
    limit: usize,
    output_schema: Schema,
    remaining: usize,
}

impl LimitExecutor {
    pub fn new(plan: &LimitPlan, child: Box<dyn Executor>) -> Self {
        Self {
            child,
            limit: plan.limit,
            output_schema: plan.output_schema.clone(),
            remaining: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.remaining = self.limit;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
