//! The schema: databases, tables, columns, index metadata, and the anchor
//! fields each table owns (live-list head, rubbish head, block count).
//! Persisted as one JSON archive, rewritten atomically on every mutation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::file::{BLOCK_HEADER_SIZE, BLOCK_SIZE, NO_BLOCK};
use crate::record::DataType;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog archive is unreadable: {0}")]
    Archive(#[from] serde_json::Error),

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("Database {0} already exists")]
    DatabaseAlreadyExists(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Index {0} already exists")]
    IndexAlreadyExists(String),

    #[error("Attribute {0} not found")]
    AttributeNotFound(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
}

impl ColumnMetadata {
    pub fn length(&self) -> usize {
        self.data_type.size()
    }
}

/// Persistent state of one B+ tree. The block-chain anchors (root,
/// leaf_head, rubbish) and the counters are maintained by every tree
/// operation and travel with the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub column: String,
    pub key_type: DataType,
    pub key_len: usize,
    /// Maximum keys per node; minimum occupancy for non-root nodes is half
    pub rank: usize,
    pub root: i32,
    pub leaf_head: i32,
    /// Head of the freed-node chain, linked through the header next field
    pub rubbish: i32,
    pub key_count: usize,
    /// Depth of every leaf; -1 while the tree is empty
    pub level: i32,
    pub node_count: usize,
    /// Node blocks ever allocated in the index file; never decreases
    pub block_count: i32,
}

impl IndexMetadata {
    pub fn new(name: &str, column: &str, key_type: DataType, rank: usize) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            key_type,
            key_len: key_type.size(),
            rank,
            root: NO_BLOCK,
            leaf_head: NO_BLOCK,
            rubbish: NO_BLOCK,
            key_count: 0,
            level: -1,
            node_count: 0,
            block_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub record_length: usize,
    /// Head of the live-block chain; -1 when the table is empty
    pub first_block: i32,
    /// Head of the free-block chain
    pub first_rubbish: i32,
    /// Blocks ever allocated, free-listed ones included; never decreases
    pub block_count: i32,
    pub columns: Vec<ColumnMetadata>,
    pub indexes: Vec<IndexMetadata>,
}

impl TableMetadata {
    pub fn new(name: &str, columns: Vec<ColumnMetadata>) -> Self {
        let record_length = columns.iter().map(|c| c.length()).sum();
        Self {
            name: name.to_string(),
            record_length,
            first_block: NO_BLOCK,
            first_rubbish: NO_BLOCK,
            block_count: 0,
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> CatalogResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| CatalogError::AttributeNotFound(name.to_string()))
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    pub fn max_records_per_block(&self) -> usize {
        (BLOCK_SIZE - BLOCK_HEADER_SIZE) / self.record_length
    }

    /// Position of an index whose key is `column`, if one exists
    pub fn index_on_column(&self, column: &str) -> Option<usize> {
        self.indexes.iter().position(|ix| ix.column == column)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    pub tables: Vec<TableMetadata>,
}

impl DatabaseMetadata {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> CatalogResult<&TableMetadata> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> CatalogResult<&mut TableMetadata> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn add_table(&mut self, table: TableMetadata) -> CatalogResult<()> {
        if self.tables.iter().any(|t| t.name == table.name) {
            return Err(CatalogError::TableAlreadyExists(table.name));
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> CatalogResult<TableMetadata> {
        let at = self
            .tables
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))?;
        Ok(self.tables.remove(at))
    }

    /// Index names are unique within a database, not within a table
    pub fn index_name_exists(&self, name: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.indexes.iter().any(|ix| ix.name == name))
    }

    /// Locate an index by name: (table position, index position)
    pub fn find_index(&self, name: &str) -> CatalogResult<(usize, usize)> {
        for (ti, table) in self.tables.iter().enumerate() {
            if let Some(ii) = table.indexes.iter().position(|ix| ix.name == name) {
                return Ok((ti, ii));
            }
        }
        Err(CatalogError::IndexNotFound(name.to_string()))
    }
}

/// The whole schema, archived as a single JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub databases: Vec<DatabaseMetadata>,
}

impl Catalog {
    pub fn archive_path(data_dir: &Path) -> PathBuf {
        data_dir.join("catalog.json")
    }

    /// Load the archive; a missing archive is an empty catalog
    pub fn load(data_dir: &Path) -> CatalogResult<Self> {
        let path = Self::archive_path(data_dir);
        if !path.exists() {
            return Ok(Catalog::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Rewrite the archive. Writes a sibling temp file first and renames it
    /// over the archive, so a crash mid-write leaves the old schema intact.
    pub fn save(&self, data_dir: &Path) -> CatalogResult<()> {
        let path = Self::archive_path(data_dir);
        let tmp = data_dir.join("catalog.json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn database(&self, name: &str) -> CatalogResult<&DatabaseMetadata> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))
    }

    pub fn database_mut(&mut self, name: &str) -> CatalogResult<&mut DatabaseMetadata> {
        self.databases
            .iter_mut()
            .find(|db| db.name == name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))
    }

    pub fn create_database(&mut self, name: &str) -> CatalogResult<()> {
        if self.databases.iter().any(|db| db.name == name) {
            return Err(CatalogError::DatabaseAlreadyExists(name.to_string()));
        }
        self.databases.push(DatabaseMetadata::new(name));
        Ok(())
    }

    pub fn drop_database(&mut self, name: &str) -> CatalogResult<DatabaseMetadata> {
        let at = self
            .databases
            .iter()
            .position(|db| db.name == name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))?;
        Ok(self.databases.remove(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.create_database("d").unwrap();

        let mut table = TableMetadata::new(
            "t",
            vec![
                ColumnMetadata {
                    name: "id".to_string(),
                    data_type: DataType::Int,
                    primary_key: true,
                },
                ColumnMetadata {
                    name: "name".to_string(),
                    data_type: DataType::Char(8),
                    primary_key: false,
                },
            ],
        );
        table
            .indexes
            .push(IndexMetadata::new("ix", "id", DataType::Int, 340));
        catalog
            .database_mut("d")
            .unwrap()
            .add_table(table)
            .unwrap();
        catalog
    }

    #[test]
    fn test_record_length_and_capacity() {
        let catalog = sample_catalog();
        let table = catalog.database("d").unwrap().table("t").unwrap();
        assert_eq!(table.record_length, 12);
        assert_eq!(table.max_records_per_block(), 340);
        assert_eq!(table.first_block, NO_BLOCK);
        assert_eq!(table.block_count, 0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut catalog = sample_catalog();
        assert!(matches!(
            catalog.create_database("d"),
            Err(CatalogError::DatabaseAlreadyExists(_))
        ));

        let db = catalog.database_mut("d").unwrap();
        let table = TableMetadata::new("t", vec![]);
        assert!(matches!(
            db.add_table(table),
            Err(CatalogError::TableAlreadyExists(_))
        ));
        assert!(db.index_name_exists("ix"));
    }

    #[test]
    fn test_lookup_errors() {
        let catalog = sample_catalog();
        assert!(matches!(
            catalog.database("nope"),
            Err(CatalogError::DatabaseNotFound(_))
        ));
        let db = catalog.database("d").unwrap();
        assert!(matches!(
            db.table("nope"),
            Err(CatalogError::TableNotFound(_))
        ));
        assert!(matches!(
            db.find_index("nope"),
            Err(CatalogError::IndexNotFound(_))
        ));
        let table = db.table("t").unwrap();
        assert!(matches!(
            table.column_index("nope"),
            Err(CatalogError::AttributeNotFound(_))
        ));
        assert_eq!(table.primary_key_index(), Some(0));
        assert_eq!(table.index_on_column("id"), Some(0));
        assert_eq!(table.index_on_column("name"), None);
    }

    #[test]
    fn test_archive_round_trip() {
        let dir = TempDir::new().unwrap();
        let catalog = sample_catalog();
        catalog.save(dir.path()).unwrap();

        let loaded = Catalog::load(dir.path()).unwrap();
        let table = loaded.database("d").unwrap().table("t").unwrap();
        assert_eq!(table.name, "t");
        assert_eq!(table.record_length, 12);
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.indexes[0].name, "ix");
        assert_eq!(table.indexes[0].rank, 340);
        assert_eq!(table.indexes[0].level, -1);
    }

    #[test]
    fn test_missing_archive_is_empty() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::load(dir.path()).unwrap();
        assert!(catalog.databases.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        sample_catalog().save(dir.path()).unwrap();
        assert!(dir.path().join("catalog.json").exists());
        assert!(!dir.path().join("catalog.json.tmp").exists());
    }
}
