#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Bool,
    Int64,
    Varchar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    cell_type: CellType,
}

impl Column {
    pub fn new(name: &str, cell_type: CellType) -> Self {
        Self {
            name: name.to_string(),
            cell_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Convenience: `n` int64 columns named `c0..`.
    pub fn int64s(n: usize) -> Self {
        Self::new(
            (0..n)
                .map(|i| Column::new(&format!("c{}", i), CellType::Int64))
                .collect(),
        )
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Schema of a join output: left columns then right columns.
    pub fn join(left: &Schema, right: &Schema) -> Schema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        Schema::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new(vec![
            Column::new("id", CellType::Int64),
            Column::new("name", CellType::Varchar),
        ]);
        assert_eq!(schema.column_count(), 2);
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn test_join_schema() {
        let l = Schema::int64s(2);
        let r = Schema::int64s(1);
        let j = Schema::join(&l, &r);
        assert_eq!(j.column_count(), 3);
    }
}
