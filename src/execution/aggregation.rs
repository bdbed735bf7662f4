use std::collections::HashMap;

use crate::{
    catalog::Schema,
    error::Result,
    execution::{AggregationPlan, AggregationType, Executor, Expression},
    storage::{Cell, Tuple},
    types::Rid,
};

/// In-memory hash aggregation table keyed by the group-by values.
struct AggregationHashTable {
    agg_types: Vec<AggregationType>,
    map: HashMap<Vec<Cell>, Vec<Cell>>,
}

impl AggregationHashTable {
    fn new(agg_types: Vec<AggregationType>) -> Self {
        Self {
            agg_types,
            map: HashMap::new(),
        }
    }

    fn initial_values(agg_types: &[AggregationType]) -> Vec<Cell> {
        agg_types
            .iter()
            .map(|t| match t {
                AggregationType::CountStar => Cell::Int64(0),
                _ => Cell::Null,
            })
            .collect()
    }

    fn insert_combine(&mut self, key: Vec<Cell>, input: Vec<Cell>) {
        let init = Self::initial_values(&self.agg_types);
        let acc = self.map.entry(key).or_insert(init);

        for (slot, agg) in self.agg_types.iter().enumerate() {
            let value = &input[slot];
            match agg {
                AggregationType::CountStar => {
                    let current = acc[slot].as_i64().unwrap_or(0);
                    acc[slot] = Cell::Int64(current + 1);
                }
                AggregationType::Count => {
                    if !value.is_null() {
                        let current = acc[slot].as_i64().unwrap_or(0);
                        acc[slot] = Cell::Int64(current + 1);
                    }
                }
                AggregationType::Sum => {
                    if let Some(v) = value.as_i64() {
                        let current = acc[slot].as_i64().unwrap_or(0);
                        acc[slot] = Cell::Int64(current + v);
                    }
                }
                AggregationType::Min => {
                    if !value.is_null()
                        && (acc[slot].is_null() || value.sort_cmp(&acc[slot]).is_lt())
                    {
                        acc[slot] = value.clone();
                    }
                }
                AggregationType::Max => {
                    if !value.is_null()
                        && (acc[slot].is_null() || value.sort_cmp(&acc[slot]).is_gt())
                    {
                        acc[slot] = value.clone();
                    }
                }
            }
        }
    }

    fn into_entries(self) -> Vec<(Vec<Cell>, Vec<Cell>)> {
        self.map.into_iter().collect()
    }
}

/// Hash aggregate. The child is drained in `init`; `next` walks the
/// grouped results. An empty input without group-bys still yields one
/// row: 0 for count(*), null for everything else.
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_bys: Vec<Expression>,
    aggregates: Vec<Expression>,
    agg_types: Vec<AggregationType>,
    output_schema: Schema,
    results: Vec<(Vec<Cell>, Vec<Cell>)>,
    cursor: usize,
    finished: bool,
}

impl AggregationExecutor {
    pub fn new(plan: &AggregationPlan, child: Box<dyn Executor>) -> Self {
        Self {
            child,
            group_bys: plan.group_bys.clone(),
            aggregates: plan.aggregates.clone(),
            agg_types: plan.agg_types.clone(),
            output_schema: plan.output_schema.clone(),
            results: Vec::new(),
            cursor: 0,
            finished: false,
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;

        let mut table = AggregationHashTable::new(self.agg_types.clone());
        while let Some((tuple, _)) = self.child.next()? {
            let schema = self.child.output_schema();
            let key: Vec<Cell> = self
                .group_bys
                .iter()
                .map(|e| e.evaluate(&tuple, schema))
                .collect();
            let input: Vec<Cell> = self
                .aggregates
                .iter()
                .map(|e| e.evaluate(&tuple, schema))
                .collect();
            table.insert_combine(key, input);
        }

        self.results = table.into_entries();
        self.cursor = 0;
        self.finished = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.results.is_empty() && self.group_bys.is_empty() && !self.finished {
            self.finished = true;
            let cells = AggregationHashTable::initial_values(&self.agg_types);
            return Ok(Some((Tuple::new(cells), Rid::INVALID)));
        }

        if self.cursor >= self.results.len() {
            return Ok(None);
        }

        let (key, values) = self.results[self.cursor].clone();
        self.cursor += 1;

        let mut cells = key;
        cells.extend(values);
        Ok(Some((Tuple::new(cells), Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
