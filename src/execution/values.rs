use crate::{
    catalog::Schema,
    error::Result,
    execution::{Executor, ValuesPlan},
    storage::{Cell, Tuple},
    types::Rid,
};

/// Leaf executor yielding literal rows; the usual child of an insert.
pub struct ValuesExecutor {
    rows: Vec<Vec<Cell>>,
    output_schema: Schema,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(plan: &ValuesPlan) -> Self {
        Self {
            rows: plan.rows.clone(),
            output_schema: plan.output_schema.clone(),
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }
        let row = Tuple::new(self.rows[self.cursor].clone());
        self.cursor += 1;
        Ok(Some((row, Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
