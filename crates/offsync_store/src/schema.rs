//! Table definitions and the in-memory schema registry.

use std::collections::{BTreeMap, HashMap};

use offsync_codec::{system, ColumnType};
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};

/// Maximum number of columns a table may declare.
///
/// The embedded engine binds at most 999 parameters per statement and the
/// widest write statement binds every column once.
pub const MAX_TABLE_COLUMNS: usize = 999;

/// The schema of one table: its name and the declared column types.
///
/// Definitions are additive: redefining a table may introduce new columns
/// but never removes or retypes existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Column name → declared type. Always contains `id`.
    pub columns: BTreeMap<String, ColumnType>,
}

impl TableDefinition {
    /// Creates an empty definition for the given table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Adds a column to the definition.
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.insert(name.into(), ty);
        self
    }

    /// Builds a definition from `(column, type-token)` pairs, accepting the
    /// documented type aliases.
    pub fn from_tokens(
        name: impl Into<String>,
        columns: &[(&str, &str)],
    ) -> StoreResult<Self> {
        let mut def = Self::new(name);
        for (column, token) in columns {
            let ty = ColumnType::parse(token)?;
            def.columns.insert((*column).to_string(), ty);
        }
        Ok(def)
    }

    /// The declared type of the `id` column, when present.
    pub fn id_type(&self) -> Option<ColumnType> {
        self.columns.get(system::ID).copied()
    }

    /// The declared type of a column.
    pub fn column_type(&self, column: &str) -> StoreResult<ColumnType> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// Checks structural validity: legal identifiers, a usable `id` column,
    /// and the engine's column bound.
    pub fn validate(&self) -> StoreResult<()> {
        validate_identifier(&self.name)
            .map_err(|_| StoreError::invalid_definition("table name is not a valid identifier"))?;

        let id_type = self.id_type().ok_or_else(|| {
            StoreError::invalid_definition(format!(
                "table '{}' does not declare an 'id' column",
                self.name
            ))
        })?;
        if !id_type.valid_for_id() {
            return Err(StoreError::invalid_definition(format!(
                "'id' column of table '{}' must be string or integer, got {}",
                self.name,
                id_type.as_str()
            )));
        }

        for column in self.columns.keys() {
            validate_identifier(column).map_err(|_| {
                StoreError::invalid_definition(format!(
                    "column '{column}' is not a valid identifier"
                ))
            })?;
        }

        if self.columns.len() > MAX_TABLE_COLUMNS {
            return Err(StoreError::TooManyColumns {
                table: self.name.clone(),
                count: self.columns.len(),
                max: MAX_TABLE_COLUMNS,
            });
        }

        Ok(())
    }
}

/// Validates a table or column identifier.
///
/// Identifiers are interpolated into statements (quoted), so the accepted
/// alphabet is kept strict: leading letter or underscore, then letters,
/// digits and underscores.
pub(crate) fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= 128 {
        Ok(())
    } else {
        Err(StoreError::invalid_argument(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

/// In-memory schema of every defined table, authoritative for typing reads
/// and writes. Keys are case-insensitive, matching the engine's treatment
/// of table names.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<HashMap<String, TableDefinition>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a definition into the registry.
    ///
    /// New columns are added to an existing definition; re-declaring an
    /// existing column with a different type fails and leaves the registry
    /// unchanged.
    pub fn register(&self, def: &TableDefinition) -> StoreResult<()> {
        let key = def.name.to_ascii_lowercase();
        let mut tables = self.tables.write();
        match tables.get_mut(&key) {
            Some(existing) => {
                for (column, &ty) in &def.columns {
                    if let Some(&prior) = existing.columns.get(column) {
                        if prior != ty {
                            return Err(StoreError::ColumnTypeChanged {
                                table: def.name.clone(),
                                column: column.clone(),
                            });
                        }
                    }
                }
                for (column, &ty) in &def.columns {
                    existing.columns.entry(column.clone()).or_insert(ty);
                }
            }
            None => {
                tables.insert(key, def.clone());
            }
        }
        Ok(())
    }

    /// Returns the merged definition of a table.
    pub fn get(&self, table: &str) -> Option<TableDefinition> {
        self.tables.read().get(&table.to_ascii_lowercase()).cloned()
    }

    /// True when the table has been defined.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.read().contains_key(&table.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_def() -> TableDefinition {
        TableDefinition::new("items")
            .with_column("id", ColumnType::String)
            .with_column("count", ColumnType::Integer)
    }

    #[test]
    fn valid_definition_passes() {
        base_def().validate().unwrap();
    }

    #[test]
    fn missing_id_rejected() {
        let def = TableDefinition::new("items").with_column("count", ColumnType::Integer);
        assert!(matches!(
            def.validate(),
            Err(StoreError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn bad_id_type_rejected() {
        let def = TableDefinition::new("items").with_column("id", ColumnType::Real);
        assert!(def.validate().is_err());
    }

    #[test]
    fn bad_identifiers_rejected() {
        assert!(TableDefinition::new("bad name")
            .with_column("id", ColumnType::String)
            .validate()
            .is_err());
        assert!(TableDefinition::new("items")
            .with_column("id", ColumnType::String)
            .with_column("a;b", ColumnType::Integer)
            .validate()
            .is_err());
    }

    #[test]
    fn column_bound_enforced() {
        let mut def = TableDefinition::new("wide").with_column("id", ColumnType::String);
        for i in 0..MAX_TABLE_COLUMNS {
            def = def.with_column(format!("c{i}"), ColumnType::Integer);
        }
        assert!(matches!(
            def.validate(),
            Err(StoreError::TooManyColumns { .. })
        ));
    }

    #[test]
    fn registry_merges_additively() {
        let registry = SchemaRegistry::new();
        registry.register(&base_def()).unwrap();

        let extension = TableDefinition::new("Items")
            .with_column("id", ColumnType::String)
            .with_column("note", ColumnType::String);
        registry.register(&extension).unwrap();

        let merged = registry.get("ITEMS").unwrap();
        assert_eq!(merged.columns.len(), 3);
        assert_eq!(merged.column_type("count").unwrap(), ColumnType::Integer);
        assert_eq!(merged.column_type("note").unwrap(), ColumnType::String);
    }

    #[test]
    fn registry_rejects_type_change() {
        let registry = SchemaRegistry::new();
        registry.register(&base_def()).unwrap();

        let retyped = TableDefinition::new("items")
            .with_column("id", ColumnType::String)
            .with_column("count", ColumnType::String);
        assert!(matches!(
            registry.register(&retyped),
            Err(StoreError::ColumnTypeChanged { .. })
        ));
    }

    #[test]
    fn from_tokens_accepts_aliases() {
        let def =
            TableDefinition::from_tokens("t", &[("id", "string"), ("n", "int"), ("f", "float")])
                .unwrap();
        assert_eq!(def.column_type("n").unwrap(), ColumnType::Integer);
        assert_eq!(def.column_type("f").unwrap(), ColumnType::Real);
    }
}
