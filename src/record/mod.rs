//! Record storage: the schema-driven codec and the per-table heap of
//! chained blocks, with insert / select / delete / update.

mod codec;
mod error;

pub use codec::{DataType, RowCodec, Value};
pub use error::{RecordError, RecordResult};

use crate::catalog::TableMetadata;
use crate::file::{BlockCache, BlockMut, BlockRef, FileId, NO_BLOCK};
use crate::index::{BPlusTree, Locator};
use crate::sql::{CompareOp, Condition, Literal};

fn column_of(table: &TableMetadata, name: &str) -> RecordResult<usize> {
    table
        .columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| RecordError::AttributeNotFound(name.to_string()))
}

/// A WHERE conjunct with its column resolved and its value typed
struct Filter {
    col: usize,
    op: CompareOp,
    value: Value,
}

/// Executes statements against one table's heap. Created per statement;
/// borrows the cache, the table metadata, and the open file handles.
///
/// `index_files` runs parallel to `table.indexes`.
pub struct RecordManager<'a> {
    cache: &'a mut BlockCache,
    table: &'a mut TableMetadata,
    file: FileId,
    index_files: Vec<FileId>,
}

impl<'a> RecordManager<'a> {
    pub fn new(
        cache: &'a mut BlockCache,
        table: &'a mut TableMetadata,
        file: FileId,
        index_files: Vec<FileId>,
    ) -> Self {
        debug_assert_eq!(index_files.len(), table.indexes.len());
        Self {
            cache,
            table,
            file,
            index_files,
        }
    }

    /// Insert one row. Returns where it was placed.
    pub fn insert(&mut self, values: &[Literal]) -> RecordResult<Locator> {
        let (row, bytes) = {
            let codec = RowCodec::new(&self.table.columns);
            let row = codec.coerce_row(values)?;
            let bytes = codec.encode_row(&row)?;
            (row, bytes)
        };

        if let Some(pk) = self.table.primary_key_index()
            && self.pk_value_exists(pk, &row[pk])?
        {
            return Err(RecordError::PrimaryKeyConflict);
        }

        let placed = self.place_record(&bytes)?;

        for i in 0..self.table.indexes.len() {
            let col = column_of(self.table, &self.table.indexes[i].column)?;
            let key = row[col].clone();
            let file = self.index_files[i];
            let mut tree = BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[i]);
            tree.insert(&key, placed)?;
        }

        Ok(placed)
    }

    /// Evaluate a conjunction of predicates, using a point lookup when an
    /// equality predicate covers an indexed column.
    pub fn select(&mut self, wheres: &[Condition]) -> RecordResult<Vec<Vec<Value>>> {
        let filters = self.resolve_conditions(wheres)?;
        let mut rows = Vec::new();

        if let Some((ix, cond)) = self.usable_index(&filters) {
            let key = filters[cond].value.clone();
            let file = self.index_files[ix];
            let mut tree = BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[ix]);
            let found = tree.get(&key)?;
            if let Some(loc) = found {
                let row = self.read_row(loc)?;
                if row_matches(&row, &filters)? {
                    rows.push(row);
                }
            }
            return Ok(rows);
        }

        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            let (next, count) = self.block_header(cur)?;
            for slot in 0..count {
                let row = self.read_row(Locator { block: cur, slot })?;
                if row_matches(&row, &filters)? {
                    rows.push(row);
                }
            }
            cur = next;
        }
        Ok(rows)
    }

    /// Delete every matching row; returns how many went away
    pub fn delete(&mut self, wheres: &[Condition]) -> RecordResult<usize> {
        let filters = self.resolve_conditions(wheres)?;

        if let Some((ix, cond)) = self.usable_index(&filters) {
            let key = filters[cond].value.clone();
            let file = self.index_files[ix];
            let mut tree = BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[ix]);
            let found = tree.get(&key)?;
            let Some(loc) = found else {
                return Ok(0);
            };
            let row = self.read_row(loc)?;
            if !row_matches(&row, &filters)? {
                return Ok(0);
            }
            self.delete_at(loc, &row)?;
            return Ok(1);
        }

        let mut deleted = 0;
        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            // The block may leave the live list mid-loop; remember its
            // successor first
            let (next, _) = self.block_header(cur)?;
            let mut slot = 0;
            loop {
                let (_, count) = self.block_header(cur)?;
                if slot >= count {
                    break;
                }
                let row = self.read_row(Locator { block: cur, slot })?;
                if row_matches(&row, &filters)? {
                    self.delete_at(Locator { block: cur, slot }, &row)?;
                    deleted += 1;
                    // The old last record now sits in this slot; look again
                } else {
                    slot += 1;
                }
            }
            cur = next;
        }
        Ok(deleted)
    }

    /// Overwrite assigned columns of every matching row in place
    pub fn update(
        &mut self,
        assignments: &[(String, Literal)],
        wheres: &[Condition],
    ) -> RecordResult<usize> {
        let filters = self.resolve_conditions(wheres)?;

        let mut assigns: Vec<(usize, Value)> = Vec::with_capacity(assignments.len());
        for (name, literal) in assignments {
            let col = column_of(self.table, name)?;
            let value = Value::from_literal(literal, &self.table.columns[col])?;
            assigns.push((col, value));
        }

        // A primary-key rewrite runs the same conflict check as insert
        if let Some(pk) = self.table.primary_key_index()
            && let Some((_, new_pk)) = assigns.iter().find(|(col, _)| *col == pk)
        {
            let new_pk = new_pk.clone();
            if self.pk_value_exists(pk, &new_pk)? {
                return Err(RecordError::PrimaryKeyConflict);
            }
        }

        let touched: Vec<usize> = {
            let mut touched = Vec::new();
            for i in 0..self.table.indexes.len() {
                let col = column_of(self.table, &self.table.indexes[i].column)?;
                if assigns.iter().any(|(c, _)| *c == col) {
                    touched.push(i);
                }
            }
            touched
        };

        let mut updated = 0;
        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            let (next, count) = self.block_header(cur)?;
            for slot in 0..count {
                let loc = Locator { block: cur, slot };
                let row = self.read_row(loc)?;
                if !row_matches(&row, &filters)? {
                    continue;
                }

                for &i in &touched {
                    let col = column_of(self.table, &self.table.indexes[i].column)?;
                    let file = self.index_files[i];
                    let mut tree =
                        BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[i]);
                    tree.remove(&row[col])?;
                }

                self.patch_row(loc, &assigns)?;

                for &i in &touched {
                    let col = column_of(self.table, &self.table.indexes[i].column)?;
                    let Some((_, new_value)) = assigns.iter().find(|(c, _)| *c == col) else {
                        continue;
                    };
                    let key = new_value.clone();
                    let file = self.index_files[i];
                    let mut tree =
                        BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[i]);
                    tree.insert(&key, loc)?;
                }

                updated += 1;
            }
            cur = next;
        }
        Ok(updated)
    }

    /// Every live row with its locator, in live-list order
    pub fn scan(&mut self) -> RecordResult<Vec<(Locator, Vec<Value>)>> {
        let mut out = Vec::new();
        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            let (next, count) = self.block_header(cur)?;
            for slot in 0..count {
                let loc = Locator { block: cur, slot };
                out.push((loc, self.read_row(loc)?));
            }
            cur = next;
        }
        Ok(out)
    }

    pub fn read_row(&mut self, loc: Locator) -> RecordResult<Vec<Value>> {
        let record_length = self.table.record_length;
        let frame = self.cache.get_block(self.file, loc.block)?;
        let block = BlockRef::new(frame);
        let at = loc.slot as usize * record_length;
        let bytes = &block.payload()[at..at + record_length];
        RowCodec::new(&self.table.columns).decode_row(bytes)
    }

    fn block_header(&mut self, num: i32) -> RecordResult<(i32, i32)> {
        let frame = self.cache.get_block(self.file, num)?;
        let block = BlockRef::new(frame);
        Ok((block.next(), block.count()))
    }

    fn resolve_conditions(&self, wheres: &[Condition]) -> RecordResult<Vec<Filter>> {
        wheres
            .iter()
            .map(|cond| {
                let col = column_of(self.table, &cond.column)?;
                let value = Value::from_literal(&cond.value, &self.table.columns[col])?;
                Ok(Filter {
                    col,
                    op: cond.op,
                    value,
                })
            })
            .collect()
    }

    /// An index is usable when its column appears in an equality predicate
    fn usable_index(&self, filters: &[Filter]) -> Option<(usize, usize)> {
        for (i, ix) in self.table.indexes.iter().enumerate() {
            let col = self
                .table
                .columns
                .iter()
                .position(|c| c.name == ix.column)?;
            for (f, filter) in filters.iter().enumerate() {
                if filter.col == col && filter.op == CompareOp::Eq {
                    return Some((i, f));
                }
            }
        }
        None
    }

    fn pk_value_exists(&mut self, pk: usize, value: &Value) -> RecordResult<bool> {
        let pk_name = self.table.columns[pk].name.clone();
        if let Some(ix) = self.table.index_on_column(&pk_name) {
            let file = self.index_files[ix];
            let mut tree = BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[ix]);
            return Ok(tree.get(value)?.is_some());
        }

        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            let (next, count) = self.block_header(cur)?;
            for slot in 0..count {
                let row = self.read_row(Locator { block: cur, slot })?;
                if row[pk].compare(value) == Some(std::cmp::Ordering::Equal) {
                    return Ok(true);
                }
            }
            cur = next;
        }
        Ok(false)
    }

    /// Find a home for an encoded record: the first live block with room,
    /// else the free-list head, else a brand-new block. Recycled and new
    /// blocks are both prepended at the live-list head.
    fn place_record(&mut self, bytes: &[u8]) -> RecordResult<Locator> {
        let record_length = self.table.record_length;
        let max = self.table.max_records_per_block() as i32;

        let mut cur = self.table.first_block;
        while cur != NO_BLOCK {
            let (next, count) = self.block_header(cur)?;
            if count < max {
                let frame = self.cache.get_block_mut(self.file, cur)?;
                let mut block = BlockMut::new(frame);
                let at = count as usize * record_length;
                block.payload_mut()[at..at + record_length].copy_from_slice(bytes);
                block.set_count(count + 1);
                return Ok(Locator {
                    block: cur,
                    slot: count,
                });
            }
            cur = next;
        }

        let num = if self.table.first_rubbish != NO_BLOCK {
            let num = self.table.first_rubbish;
            let frame = self.cache.get_block(self.file, num)?;
            self.table.first_rubbish = BlockRef::new(frame).next();
            if self.table.first_rubbish != NO_BLOCK {
                let frame = self.cache.get_block_mut(self.file, self.table.first_rubbish)?;
                BlockMut::new(frame).set_prev(NO_BLOCK);
            }
            num
        } else {
            let num = self.table.block_count;
            self.table.block_count += 1;
            num
        };

        let old_head = self.table.first_block;
        {
            let frame = self.cache.get_block_mut(self.file, num)?;
            let mut block = BlockMut::new(frame);
            block.init(NO_BLOCK, old_head, 1);
            block.payload_mut()[..record_length].copy_from_slice(bytes);
        }
        if old_head != NO_BLOCK {
            let frame = self.cache.get_block_mut(self.file, old_head)?;
            BlockMut::new(frame).set_prev(num);
        }
        self.table.first_block = num;

        Ok(Locator {
            block: num,
            slot: 0,
        })
    }

    /// Remove the record at `loc` by swapping the block's last record into
    /// its slot. Keeps every index honest: the victim's keys go away and
    /// the relocated record's locators are repointed at `loc`.
    fn delete_at(&mut self, loc: Locator, victim: &[Value]) -> RecordResult<()> {
        let record_length = self.table.record_length;

        let (count_after, moved) = {
            let frame = self.cache.get_block_mut(self.file, loc.block)?;
            let mut block = BlockMut::new(frame);
            let last = block.count() - 1;
            if loc.slot != last {
                let from = last as usize * record_length;
                let to = loc.slot as usize * record_length;
                block
                    .payload_mut()
                    .copy_within(from..from + record_length, to);
            }
            block.set_count(last);
            (last, loc.slot != last)
        };

        let moved_row = if moved {
            Some(self.read_row(loc)?)
        } else {
            None
        };

        for i in 0..self.table.indexes.len() {
            let col = column_of(self.table, &self.table.indexes[i].column)?;
            let victim_key = victim[col].clone();
            let moved_key = moved_row.as_ref().map(|row| row[col].clone());
            let file = self.index_files[i];
            let mut tree = BPlusTree::new(&mut *self.cache, file, &mut self.table.indexes[i]);
            tree.remove(&victim_key)?;
            if let Some(key) = moved_key {
                tree.update_locator(&key, loc)?;
            }
        }

        if count_after == 0 {
            self.retire_block(loc.block)?;
        }
        Ok(())
    }

    /// Unlink an emptied block from the live list and prepend it to the
    /// free list
    fn retire_block(&mut self, num: i32) -> RecordResult<()> {
        let (prev, next) = {
            let frame = self.cache.get_block(self.file, num)?;
            let block = BlockRef::new(frame);
            (block.prev(), block.next())
        };

        if prev != NO_BLOCK {
            let frame = self.cache.get_block_mut(self.file, prev)?;
            BlockMut::new(frame).set_next(next);
        } else {
            self.table.first_block = next;
        }
        if next != NO_BLOCK {
            let frame = self.cache.get_block_mut(self.file, next)?;
            BlockMut::new(frame).set_prev(prev);
        }

        if self.table.first_rubbish != NO_BLOCK {
            let frame = self.cache.get_block_mut(self.file, self.table.first_rubbish)?;
            BlockMut::new(frame).set_prev(num);
        }
        let frame = self.cache.get_block_mut(self.file, num)?;
        BlockMut::new(frame).init(NO_BLOCK, self.table.first_rubbish, 0);
        self.table.first_rubbish = num;
        Ok(())
    }

    fn patch_row(&mut self, loc: Locator, assigns: &[(usize, Value)]) -> RecordResult<()> {
        let record_length = self.table.record_length;
        let codec = RowCodec::new(&self.table.columns);
        let frame = self.cache.get_block_mut(self.file, loc.block)?;
        let mut block = BlockMut::new(frame);
        let at = loc.slot as usize * record_length;
        let bytes = &mut block.payload_mut()[at..at + record_length];
        for (col, value) in assigns {
            codec.patch_column(bytes, *col, value)?;
        }
        Ok(())
    }
}

fn row_matches(row: &[Value], filters: &[Filter]) -> RecordResult<bool> {
    for filter in filters {
        let ord = row[filter.col]
            .compare(&filter.value)
            .ok_or_else(|| RecordError::TypeMismatch {
                expected: "comparable values".to_string(),
                actual: "mismatched types".to_string(),
            })?;
        if !filter.op.matches(ord) {
            return Ok(false);
        }
    }
    Ok(true)
}
