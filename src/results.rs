use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::types::RowValues;

/// A row from a query result
///
/// Column names and values are kept side by side in result-set order.
/// Names are not required to be unique; lookups by name return the first
/// match.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    column_names: Vec<String>,
    values: Vec<RowValues>,
}

impl Row {
    /// Create a new row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values, one per column
    ///
    /// # Panics
    ///
    /// In debug builds, if the two vectors differ in length.
    #[must_use]
    pub fn new(column_names: Vec<String>, values: Vec<RowValues>) -> Self {
        debug_assert_eq!(column_names.len(), values.len());
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of the first column with this name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn values(&self) -> &[RowValues] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValues)> {
        self.column_names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, Vec<RowValues>) {
        (self.column_names, self.values)
    }
}

/// Serializes as a map in column order. Duplicate names are emitted as
/// duplicate keys.
impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["a".into(), "b".into(), "a".into()],
            vec![
                RowValues::Text("x".into()),
                RowValues::Int(1),
                RowValues::Null,
            ],
        )
    }

    #[test]
    fn lookup_by_name_returns_first_match() {
        let row = sample();
        assert_eq!(row.get("a"), Some(&RowValues::Text("x".into())));
        assert_eq!(row.get("b").and_then(RowValues::as_int), Some(1));
        assert_eq!(row.get_by_index(2), Some(&RowValues::Null));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn serializes_in_column_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"{"a":"x","b":1,"a":null}"#);
    }
}
