/*
The top level controller. It owns the pager, the system catalog tree rooted
at page 1, the in-memory table metadata map, the code generator and the
machine, and routes every SQL statement:

  CREATE TABLE                    allocate a tree, register metadata
  UPDATE / DELETE / DROP / ALTER  executed directly against the b-tree
  SELECT with ORDER BY, LIMIT,
  OFFSET or DISTINCT              full scan with in-memory post-processing
  everything else                 optimize, generate code, run the machine

After a machine run, any tree whose root moved (a split reached the root)
has its metadata updated and the catalog rewritten, and the machine's tree
cache is invalidated.
*/

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use itertools::Itertools;
use log::{debug, info};

use crate::btree::BTree;
use crate::errors::{DbError, Result};
use crate::pager::{Pager, DEFAULT_PAGE_SIZE};
use crate::record::{Record, Value};
use crate::schema::TableMetadata;
use crate::sql::codegen::CodeGenerator;
use crate::sql::optimizer;
use crate::sql::parser::{
    self, AlterTableStatement, BinaryOperator, CreateTableStatement, DeleteStatement,
    DropTableStatement, Expr, Projection, SelectStatement, SortOrder, Statement, UpdateStatement,
};
use crate::vm::{StackValue, Vm};

/// The system catalog tree is always rooted here.
pub const CATALOG_ROOT_PAGE: u32 = 1;

/// An open database file.
pub struct Database {
    pager: Pager,
    catalog: BTree,
    tables: BTreeMap<String, TableMetadata>,
    codegen: CodeGenerator,
    vm: Vm,
}

impl Database {
    /// Open or create the database at `path`, loading table metadata from
    /// the system catalog.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let mut pager = Pager::open(path, DEFAULT_PAGE_SIZE)?;
        let mut tables = BTreeMap::new();

        let catalog = if pager.num_pages() <= CATALOG_ROOT_PAGE {
            // fresh file: the first allocated page becomes the catalog root
            let catalog = BTree::create(&mut pager)?;
            info!("created system catalog at page {}", catalog.root_page());
            catalog
        } else {
            let catalog = BTree::open(CATALOG_ROOT_PAGE);
            for (_, record) in catalog.scan(&mut pager)? {
                let entry = match record.get(0) {
                    Some(Value::Text(entry)) => entry.clone(),
                    other => {
                        return Err(DbError::corrupt(format!(
                            "catalog entry is not text: {other:?}"
                        )));
                    }
                };
                let meta = TableMetadata::from_entry(&entry)?;
                info!("loaded table '{}' from catalog", meta.name);
                tables.insert(meta.name.clone(), meta);
            }
            catalog
        };

        Ok(Database {
            pager,
            catalog,
            tables,
            codegen: CodeGenerator::new(),
            vm: Vm::new(),
        })
    }

    /// Execute one SQL statement. SELECT returns its rows; every other
    /// statement returns an empty list.
    pub fn execute(&mut self, sql: &str) -> Result<Vec<Vec<Value>>> {
        debug!("execute: {sql}");
        match parser::parse(sql)? {
            Statement::CreateTable(stmt) => {
                self.execute_create_table(stmt)?;
                Ok(Vec::new())
            }
            Statement::Update(stmt) => {
                self.execute_update(stmt)?;
                Ok(Vec::new())
            }
            Statement::Delete(stmt) => {
                self.execute_delete(stmt)?;
                Ok(Vec::new())
            }
            Statement::DropTable(stmt) => {
                self.execute_drop_table(stmt)?;
                Ok(Vec::new())
            }
            Statement::AlterTable(stmt) => {
                self.execute_alter_table(stmt)?;
                Ok(Vec::new())
            }
            Statement::Select(ref stmt) if stmt.is_advanced() => {
                self.execute_select_advanced(stmt)
            }
            statement => self.execute_program(statement),
        }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Persist all metadata (including auto-increment counters), flush and
    /// release the file.
    pub fn close(mut self) -> Result<()> {
        self.save_catalog()?;
        self.pager.close()
    }

    fn execute_program(&mut self, statement: Statement) -> Result<Vec<Vec<Value>>> {
        let statement = optimizer::optimize(statement);
        let program = self.codegen.generate(&statement, &mut self.tables)?;
        let raw_rows = self.vm.execute(&mut self.pager, &program)?;
        self.sync_migrated_roots()?;

        let rows: Vec<Vec<Value>> = raw_rows.into_iter().map(flatten_row).collect();
        match &statement {
            Statement::Select(stmt) => {
                let meta = self
                    .tables
                    .get(&stmt.table)
                    .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;
                project_rows(rows, &stmt.projection, meta)
            }
            _ => Ok(rows),
        }
    }

    /// Trees opened by the machine under a root that has since migrated get
    /// their metadata entry moved along, and the stale cache is dropped.
    fn sync_migrated_roots(&mut self) -> Result<()> {
        let migrations: Vec<(u32, u32)> = self
            .vm
            .trees()
            .iter()
            .filter(|(opened_as, tree)| tree.root_page() != **opened_as)
            .map(|(opened_as, tree)| (*opened_as, tree.root_page()))
            .collect();
        if migrations.is_empty() {
            return Ok(());
        }

        let mut changed = false;
        for (old_root, new_root) in migrations {
            if let Some(meta) = self.tables.values_mut().find(|m| m.root_page == old_root) {
                info!(
                    "table '{}' root moved from page {old_root} to {new_root}",
                    meta.name
                );
                meta.root_page = new_root;
                changed = true;
            }
        }

        if changed {
            self.save_catalog()?;
            self.vm.clear_tree_cache();
        }
        Ok(())
    }

    fn execute_create_table(&mut self, stmt: CreateTableStatement) -> Result<()> {
        if self.tables.contains_key(&stmt.table) {
            return Err(DbError::schema(format!(
                "table '{}' already exists",
                stmt.table
            )));
        }
        for (i, column) in stmt.columns.iter().enumerate() {
            if stmt.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DbError::schema(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, stmt.table
                )));
            }
        }

        let tree = BTree::create(&mut self.pager)?;
        let meta = TableMetadata::new(stmt.table.clone(), tree.root_page(), stmt.columns);
        info!(
            "created table '{}' with root page {}",
            meta.name,
            meta.root_page
        );

        self.tables.insert(stmt.table, meta);
        self.save_catalog()
    }

    fn execute_update(&mut self, stmt: UpdateStatement) -> Result<()> {
        let meta = self
            .tables
            .get(&stmt.table)
            .cloned()
            .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

        let mut resolved = Vec::with_capacity(stmt.assignments.len());
        for (column, value) in &stmt.assignments {
            let index = meta.column_index(column).ok_or_else(|| {
                DbError::schema(format!(
                    "no such column '{column}' in table '{}'",
                    stmt.table
                ))
            })?;
            resolved.push((index, value.clone()));
        }

        let mut tree = BTree::open(meta.root_page);
        let mut updated = 0usize;
        for (key, record) in tree.scan(&mut self.pager)? {
            if !evaluate_simple_where(&record, stmt.where_clause.as_ref(), &meta) {
                continue;
            }

            let mut values = record.into_values();
            for (index, value) in &resolved {
                // rows created before an ALTER ADD may be short
                while values.len() <= *index {
                    values.push(Value::Null);
                }
                values[*index] = value.clone();
            }
            tree.update(&mut self.pager, key, &Record::new(values))?;
            updated += 1;
        }
        info!("updated {updated} rows in '{}'", stmt.table);

        if tree.root_page() != meta.root_page {
            if let Some(meta) = self.tables.get_mut(&stmt.table) {
                meta.root_page = tree.root_page();
            }
            self.save_catalog()?;
            self.vm.clear_tree_cache();
        }
        Ok(())
    }

    fn execute_delete(&mut self, stmt: DeleteStatement) -> Result<()> {
        let meta = self
            .tables
            .get(&stmt.table)
            .cloned()
            .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

        let mut tree = BTree::open(meta.root_page);
        let doomed: Vec<u64> = tree
            .scan(&mut self.pager)?
            .into_iter()
            .filter(|(_, record)| {
                evaluate_simple_where(record, stmt.where_clause.as_ref(), &meta)
            })
            .map(|(key, _)| key)
            .collect();

        for key in &doomed {
            tree.delete(&mut self.pager, *key)?;
        }
        info!("deleted {} rows from '{}'", doomed.len(), stmt.table);
        Ok(())
    }

    fn execute_select_advanced(&mut self, stmt: &SelectStatement) -> Result<Vec<Vec<Value>>> {
        let meta = self
            .tables
            .get(&stmt.table)
            .cloned()
            .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

        let tree = BTree::open(meta.root_page);
        let mut rows: Vec<Vec<Value>> = tree
            .scan(&mut self.pager)?
            .into_iter()
            .filter(|(_, record)| {
                evaluate_simple_where(record, stmt.where_clause.as_ref(), &meta)
            })
            .map(|(_, record)| record.into_values())
            .collect();

        // sort the full rows first so ordering may use unprojected columns;
        // stable passes in reverse give multi-column precedence
        for (column, direction) in stmt.order_by.iter().rev() {
            let index = meta.column_index(column).ok_or_else(|| {
                DbError::schema(format!(
                    "no such column '{column}' in table '{}'",
                    stmt.table
                ))
            })?;
            rows.sort_by(|a, b| {
                let ordering = match (a.get(index), b.get(index)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                match direction {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let mut rows = project_rows(rows, &stmt.projection, &meta)?;

        if stmt.distinct {
            rows = rows
                .into_iter()
                .unique_by(|row| format!("{row:?}"))
                .collect();
        }
        if let Some(offset) = stmt.offset {
            rows = rows.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = stmt.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    fn execute_drop_table(&mut self, stmt: DropTableStatement) -> Result<()> {
        if self.tables.remove(&stmt.table).is_none() {
            return Err(DbError::schema(format!("no such table: {}", stmt.table)));
        }
        info!("dropped table '{}'", stmt.table);

        // the tree's pages are orphaned, there is no free list to return
        // them to
        self.save_catalog()?;
        self.vm.clear_tree_cache();
        Ok(())
    }

    fn execute_alter_table(&mut self, stmt: AlterTableStatement) -> Result<()> {
        let meta = self
            .tables
            .get_mut(&stmt.table)
            .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

        if meta.column_index(&stmt.column.name).is_some() {
            return Err(DbError::schema(format!(
                "column '{}' already exists in table '{}'",
                stmt.column.name, stmt.table
            )));
        }

        info!(
            "added column '{}' to table '{}'",
            stmt.column.name, stmt.table
        );
        meta.columns.push(stmt.column);
        self.save_catalog()
    }

    /// Rewrite the catalog from scratch: reformat its root leaf and insert
    /// one entry per table, keyed 1..n. Rebuilding keeps dead entries from
    /// piling up; a catalog that no longer fits its root page is a hard
    /// limit.
    fn save_catalog(&mut self) -> Result<()> {
        let mut catalog = BTree::reinit(&mut self.pager, self.catalog.root_page())?;
        for (i, meta) in self.tables.values().enumerate() {
            let record = Record::new(vec![Value::Text(meta.to_entry()?)]);
            catalog.insert(&mut self.pager, i as u64 + 1, &record)?;
        }

        if catalog.root_page() != CATALOG_ROOT_PAGE {
            return Err(DbError::ResourceLimit(
                "system catalog no longer fits on its root page".into(),
            ));
        }
        self.catalog = catalog;
        self.pager.flush()?;

        debug!("saved {} catalog entries", self.tables.len());
        Ok(())
    }
}

fn flatten_row(row: Vec<StackValue>) -> Vec<Value> {
    let mut out = Vec::new();
    for entry in row {
        match entry {
            StackValue::Value(value) => out.push(value),
            StackValue::Record(record) => out.extend(record.into_values()),
        }
    }
    out
}

fn project_rows(
    rows: Vec<Vec<Value>>,
    projection: &Projection,
    meta: &TableMetadata,
) -> Result<Vec<Vec<Value>>> {
    let names = match projection {
        Projection::All => return Ok(rows),
        Projection::Columns(names) => names,
    };

    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let index = meta.column_index(name).ok_or_else(|| {
            DbError::schema(format!(
                "no such column '{name}' in table '{}'",
                meta.name
            ))
        })?;
        indices.push(index);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            indices
                .iter()
                // rows older than an ALTER ADD read missing columns as NULL
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect())
}

/// The direct-execution WHERE evaluator handles `column OP literal` only.
/// Any other shape evaluates to true and filters nothing.
fn evaluate_simple_where(
    record: &Record,
    where_clause: Option<&Expr>,
    meta: &TableMetadata,
) -> bool {
    let Some(Expr::Binary { left, op, right }) = where_clause else {
        return true;
    };
    let (Expr::Column(column), Expr::Literal(literal)) = (left.as_ref(), right.as_ref()) else {
        return true;
    };
    let Some(index) = meta.column_index(column) else {
        return false;
    };

    let stored = record.get(index).cloned().unwrap_or(Value::Null);
    match op {
        BinaryOperator::Eq => stored.equals(literal),
        BinaryOperator::Ne => !stored.equals(literal),
        BinaryOperator::Lt => stored.compare(literal) == Some(Ordering::Less),
        BinaryOperator::Le => matches!(
            stored.compare(literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
        BinaryOperator::Gt => stored.compare(literal) == Some(Ordering::Greater),
        BinaryOperator::Ge => matches!(
            stored.compare(literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        // AND/OR shapes are not supported on this path
        _ => true,
    }
}
