use std::cmp::Ordering;

use crate::{catalog::Schema, storage::{Cell, Tuple}};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// Minimal scalar expression tree: column references, literals, and
/// comparisons. In join contexts `side` selects the left (0) or right
/// (1) input row.
#[derive(Debug, Clone)]
pub enum Expression {
    ColumnRef { side: usize, index: usize },
    Literal(Cell),
    Comparison {
        op: ComparisonOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::ColumnRef { side: 0, index }
    }

    pub fn right_column(index: usize) -> Self {
        Expression::ColumnRef { side: 1, index }
    }

    pub fn literal(cell: Cell) -> Self {
        Expression::Literal(cell)
    }

    pub fn comparison(op: ComparisonOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Comparison {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Cell {
        match self {
            Expression::ColumnRef { index, .. } => tuple.cell_at(*index).clone(),
            Expression::Literal(cell) => cell.clone(),
            Expression::Comparison { op, lhs, rhs } => {
                let l = lhs.evaluate(tuple, schema);
                let r = rhs.evaluate(tuple, schema);
                compare_cells(*op, &l, &r)
            }
        }
    }

    pub fn evaluate_join(
        &self,
        left: &Tuple,
        left_schema: &Schema,
        right: &Tuple,
        right_schema: &Schema,
    ) -> Cell {
        match self {
            Expression::ColumnRef { side, index } => {
                if *side == 0 {
                    left.cell_at(*index).clone()
                } else {
                    right.cell_at(*index).clone()
                }
            }
            Expression::Literal(cell) => cell.clone(),
            Expression::Comparison { op, lhs, rhs } => {
                let l = lhs.evaluate_join(left, left_schema, right, right_schema);
                let r = rhs.evaluate_join(left, left_schema, right, right_schema);
                compare_cells(*op, &l, &r)
            }
        }
    }
}

/// SQL comparison: null operands make the result null.
fn compare_cells(op: ComparisonOp, l: &Cell, r: &Cell) -> Cell {
    match l.compare(r) {
        None => Cell::Null,
        Some(ord) => {
            let result = match op {
                ComparisonOp::Equal => ord == Ordering::Equal,
                ComparisonOp::NotEqual => ord != Ordering::Equal,
                ComparisonOp::LessThan => ord == Ordering::Less,
                ComparisonOp::LessThanOrEqual => ord != Ordering::Greater,
                ComparisonOp::GreaterThan => ord == Ordering::Greater,
                ComparisonOp::GreaterThanOrEqual => ord != Ordering::Less,
            };
            Cell::Bool(result)
        }
    }
}
