//! SQL identifiers

/// Double-quoted SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Schema holding staging tables for a dataset
pub fn staging_schema(dataset: &str) -> String {
    format!("{}_staging", dataset)
}

/// A schema-qualified table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Staging counterpart of a dataset table (`{dataset}_staging.{table}`)
    pub fn staging_for(&self) -> Self {
        Self::new(staging_schema(&self.schema), self.table.clone())
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_staging_ref() {
        let target = TableRef::new("sales", "sales_data");
        let staging = target.staging_for();
        assert_eq!(staging.to_string(), "\"sales_staging\".\"sales_data\"");
    }
}
