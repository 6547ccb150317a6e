//! The executor facade: one `Engine` context owning the block cache, the
//! catalog, and the current database selection, dispatching parsed
//! statements to the components that handle them.
//!
//! Durability is statement-grained: every mutating statement ends by
//! flushing dirty frames and rewriting the catalog archive. Nothing finer
//! is guaranteed.


use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, ColumnMetadata, IndexMetadata};
use crate::file::{BlockCache, FileError, FileId, FileManager, BLOCK_HEADER_SIZE, BLOCK_SIZE};
use crate::index::{rank_for, BPlusTree, IndexError, Locator};
use crate::record::{DataType, RecordError, RecordManager, Value};
use crate::sql::{self, ColumnType, Statement};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No database selected")]
    NoDatabaseSelected,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid table definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What a statement produced, for the caller to render
#[derive(Debug, PartialEq)]
pub enum QueryResult {
    Done,
    Affected(usize),
    Rows(Vec<String>, Vec<Vec<String>>),
    Batch(Vec<QueryResult>),
    Exit,
}

pub struct Engine {
    data_dir: PathBuf,
    cache: BlockCache,
    catalog: Catalog,
    current_db: Option<String>,
}

impl Engine {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        let catalog = Catalog::load(&data_dir)?;

        Ok(Self {
            data_dir,
            cache: BlockCache::new(FileManager::new()),
            catalog,
            current_db: None,
        })
    }

    pub fn execute(&mut self, stmt: Statement) -> EngineResult<QueryResult> {
        log::debug!("executing {:?}", stmt);
        match stmt {
            Statement::CreateDatabase(name) => self.create_database(&name),
            Statement::DropDatabase(name) => self.drop_database(&name),
            Statement::Use(name) => self.use_database(&name),
            Statement::CreateTable { table, columns } => self.create_table(&table, columns),
            Statement::DropTable(name) => self.drop_table(&name),
            Statement::CreateIndex {
                name,
                table,
                column,
            } => self.create_index(&name, &table, &column),
            Statement::DropIndex(name) => self.drop_index(&name),
            Statement::Insert { table, values } => {
                let db = self.current()?;
                let (file, index_files) = self.open_table_files(&db, &table)?;
                let meta = self.catalog.database_mut(&db)?.table_mut(&table)?;
                let mut manager = RecordManager::new(&mut self.cache, meta, file, index_files);
                manager.insert(&values)?;
                self.finish_statement()?;
                Ok(QueryResult::Affected(1))
            }
            Statement::Select { table, wheres } => {
                let db = self.current()?;
                let (file, index_files) = self.open_table_files(&db, &table)?;
                let headers: Vec<String> = self
                    .catalog
                    .database(&db)?
                    .table(&table)?
                    .columns
                    .iter()
                    .map(|c| c.name.clone())
                    .collect();
                let meta = self.catalog.database_mut(&db)?.table_mut(&table)?;
                let mut manager = RecordManager::new(&mut self.cache, meta, file, index_files);
                let rows = manager.select(&wheres)?;
                let rendered = rows
                    .iter()
                    .map(|row| row.iter().map(Value::to_string).collect())
                    .collect();
                Ok(QueryResult::Rows(headers, rendered))
            }
            Statement::Delete { table, wheres } => {
                let db = self.current()?;
                let (file, index_files) = self.open_table_files(&db, &table)?;
                let meta = self.catalog.database_mut(&db)?.table_mut(&table)?;
                let mut manager = RecordManager::new(&mut self.cache, meta, file, index_files);
                let deleted = manager.delete(&wheres)?;
                self.finish_statement()?;
                Ok(QueryResult::Affected(deleted))
            }
            Statement::Update {
                table,
                assignments,
                wheres,
            } => {
                let db = self.current()?;
                let (file, index_files) = self.open_table_files(&db, &table)?;
                let meta = self.catalog.database_mut(&db)?.table_mut(&table)?;
                let mut manager = RecordManager::new(&mut self.cache, meta, file, index_files);
                let updated = manager.update(&assignments, &wheres)?;
                self.finish_statement()?;
                Ok(QueryResult::Affected(updated))
            }
            Statement::Exec(path) => self.exec_script(&path),
            Statement::Quit => {
                self.cache.flush_all()?;
                Ok(QueryResult::Exit)
            }
        }
    }

    fn create_database(&mut self, name: &str) -> EngineResult<QueryResult> {
        self.catalog.create_database(name)?;
        fs::create_dir_all(self.db_path(name))?;
        self.catalog.save(&self.data_dir)?;
        log::info!("created database {}", name);
        Ok(QueryResult::Done)
    }

    fn drop_database(&mut self, name: &str) -> EngineResult<QueryResult> {
        let dropped = self.catalog.drop_database(name)?;

        for table in &dropped.tables {
            self.cache
                .remove_file(&self.records_path(name, &table.name))?;
            for ix in &table.indexes {
                self.cache
                    .remove_file(&self.index_path(name, &table.name, &ix.name))?;
            }
        }
        let dir = self.db_path(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }

        if self.current_db.as_deref() == Some(name) {
            self.current_db = None;
        }
        self.catalog.save(&self.data_dir)?;
        log::info!("dropped database {}", name);
        Ok(QueryResult::Done)
    }

    fn use_database(&mut self, name: &str) -> EngineResult<QueryResult> {
        self.catalog.database(name)?;
        self.current_db = Some(name.to_string());
        Ok(QueryResult::Done)
    }

    fn create_table(
        &mut self,
        table: &str,
        columns: Vec<sql::ColumnDef>,
    ) -> EngineResult<QueryResult> {
        let db = self.current()?;

        if columns.is_empty() {
            return Err(EngineError::InvalidDefinition(
                "a table needs at least one column".to_string(),
            ));
        }
        let pk_count = columns.iter().filter(|c| c.primary_key).count();
        if pk_count > 1 {
            return Err(EngineError::InvalidDefinition(
                "at most one primary key column".to_string(),
            ));
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(EngineError::InvalidDefinition(format!(
                    "duplicate column {}",
                    col.name
                )));
            }
            if let ColumnType::Char(0) = col.column_type {
                return Err(EngineError::InvalidDefinition(format!(
                    "char column {} needs a length of at least 1",
                    col.name
                )));
            }
        }

        let columns: Vec<ColumnMetadata> = columns
            .into_iter()
            .map(|c| ColumnMetadata {
                name: c.name,
                data_type: match c.column_type {
                    ColumnType::Int => DataType::Int,
                    ColumnType::Float => DataType::Float,
                    ColumnType::Char(n) => DataType::Char(n),
                },
                primary_key: c.primary_key,
            })
            .collect();

        let record_length: usize = columns.iter().map(|c| c.length()).sum();
        if record_length > BLOCK_SIZE - BLOCK_HEADER_SIZE {
            return Err(EngineError::InvalidDefinition(format!(
                "record of {} bytes does not fit a block",
                record_length
            )));
        }

        let meta = crate::catalog::TableMetadata::new(table, columns);
        self.catalog.database_mut(&db)?.add_table(meta)?;
        let path = self.records_path(&db, table);
        self.cache.file_manager_mut().create_file(path)?;
        self.catalog.save(&self.data_dir)?;
        log::info!("created table {}.{}", db, table);
        Ok(QueryResult::Done)
    }

    fn drop_table(&mut self, table: &str) -> EngineResult<QueryResult> {
        let db = self.current()?;
        let dropped = self.catalog.database_mut(&db)?.remove_table(table)?;

        self.cache.remove_file(&self.records_path(&db, table))?;
        for ix in &dropped.indexes {
            self.cache
                .remove_file(&self.index_path(&db, table, &ix.name))?;
        }
        self.catalog.save(&self.data_dir)?;
        log::info!("dropped table {}.{}", db, table);
        Ok(QueryResult::Done)
    }

    fn create_index(&mut self, name: &str, table: &str, column: &str) -> EngineResult<QueryResult> {
        let db = self.current()?;

        if self.catalog.database(&db)?.index_name_exists(name) {
            return Err(CatalogError::IndexAlreadyExists(name.to_string()).into());
        }
        let (key_type, col) = {
            let meta = self.catalog.database(&db)?.table(table)?;
            let col = meta.column_index(column)?;
            (meta.columns[col].data_type, col)
        };
        let rank = rank_for(key_type.size())?;

        // Open the heap and the existing index files before the new index
        // joins the metadata, so the handle list stays parallel
        let (file, mut index_files) = self.open_table_files(&db, table)?;
        let path = self.index_path(&db, table, name);
        self.cache.file_manager_mut().create_file(&path)?;
        let ix_file = self.cache.file_manager_mut().open_file(&path)?;
        index_files.push(ix_file);

        let meta = self.catalog.database_mut(&db)?.table_mut(table)?;
        meta.indexes
            .push(IndexMetadata::new(name, column, key_type, rank));
        let ix_pos = meta.indexes.len() - 1;

        // Build the tree from every live record
        let entries: Vec<(Value, Locator)> = {
            let mut manager = RecordManager::new(&mut self.cache, meta, file, index_files);
            manager
                .scan()?
                .into_iter()
                .map(|(loc, row)| (row[col].clone(), loc))
                .collect()
        };

        let mut build_error = None;
        {
            let meta = self.catalog.database_mut(&db)?.table_mut(table)?;
            let mut tree = BPlusTree::new(&mut self.cache, ix_file, &mut meta.indexes[ix_pos]);
            for (key, loc) in entries {
                if let Err(e) = tree.insert(&key, loc) {
                    build_error = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = build_error {
            // Undo the half-built index; the archive was never rewritten
            self.catalog
                .database_mut(&db)?
                .table_mut(table)?
                .indexes
                .pop();
            self.cache.remove_file(&path)?;
            return Err(e.into());
        }

        self.finish_statement()?;
        log::info!("created index {} on {}.{}({})", name, db, table, column);
        Ok(QueryResult::Done)
    }

    fn drop_index(&mut self, name: &str) -> EngineResult<QueryResult> {
        let db = self.current()?;
        let (ti, ii) = self.catalog.database(&db)?.find_index(name)?;

        let (table, ix) = {
            let database = self.catalog.database_mut(&db)?;
            let table = &mut database.tables[ti];
            let ix = table.indexes.remove(ii);
            (table.name.clone(), ix)
        };
        self.cache
            .remove_file(&self.index_path(&db, &table, &ix.name))?;
        self.catalog.save(&self.data_dir)?;
        log::info!("dropped index {}", name);
        Ok(QueryResult::Done)
    }

    /// Run a script: parse the whole file, then dispatch each statement
    /// through the ordinary path
    fn exec_script(&mut self, path: &str) -> EngineResult<QueryResult> {
        let text = fs::read_to_string(path)?;
        let statements = sql::parse(&text).map_err(EngineError::Parse)?;

        let mut results = Vec::with_capacity(statements.len());
        for stmt in statements {
            let result = self.execute(stmt)?;
            let done = result == QueryResult::Exit;
            results.push(result);
            if done {
                break;
            }
        }
        Ok(QueryResult::Batch(results))
    }

    fn current(&self) -> EngineResult<String> {
        self.current_db
            .clone()
            .ok_or(EngineError::NoDatabaseSelected)
    }

    fn db_path(&self, db: &str) -> PathBuf {
        self.data_dir.join(db)
    }

    fn records_path(&self, db: &str, table: &str) -> PathBuf {
        self.db_path(db).join(format!("{}.records", table))
    }

    fn index_path(&self, db: &str, table: &str, index: &str) -> PathBuf {
        self.db_path(db).join(format!("{}.{}.index", table, index))
    }

    /// Open the heap file and one file per index, in index order
    fn open_table_files(&mut self, db: &str, table: &str) -> EngineResult<(FileId, Vec<FileId>)> {
        let index_names: Vec<String> = self
            .catalog
            .database(db)?
            .table(table)?
            .indexes
            .iter()
            .map(|ix| ix.name.clone())
            .collect();

        let path = self.records_path(db, table);
        let file = self.cache.file_manager_mut().open_file(path)?;
        let mut index_files = Vec::with_capacity(index_names.len());
        for name in &index_names {
            let path = self.index_path(db, table, name);
            index_files.push(self.cache.file_manager_mut().open_file(path)?);
        }
        Ok((file, index_files))
    }

    /// Statement boundary: write back every dirty frame, then rewrite the
    /// catalog archive
    fn finish_statement(&mut self) -> EngineResult<()> {
        self.cache.flush_all()?;
        self.catalog.save(&self.data_dir)?;
        Ok(())
    }
}
