/*
A stack machine executing straight-line programs with explicit jumps.

Each instruction carries an opcode and up to four operands (p1, p2, p3, p4);
p4 is the string operand. Jump targets are instruction indices and a firing
jump sets the program counter to the target directly.

Cursors iterate a b-tree by materializing its cells on REWIND or SEEK. The
tree cache is keyed by the root page recorded when the cursor was opened, so
a caller can diff cache keys against current roots to spot root migrations
caused by splits.
*/

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::btree::BTree;
use crate::errors::{DbError, Result};
use crate::pager::Pager;
use crate::record::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    OpenRead,
    OpenWrite,
    Close,
    Rewind,
    Next,
    Seek,
    Key,
    Data,
    Column,
    Integer,
    String,
    Null,
    MakeRecord,
    Insert,
    Delete,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Jump,
    JumpIfFalse,
    ResultRow,
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: Option<String>,
}

impl Instruction {
    pub fn simple(opcode: Opcode) -> Instruction {
        Instruction {
            opcode,
            p1: 0,
            p2: 0,
            p3: 0,
            p4: None,
        }
    }

    pub fn unary(opcode: Opcode, p1: i64) -> Instruction {
        Instruction {
            p1,
            ..Instruction::simple(opcode)
        }
    }

    pub fn binary(opcode: Opcode, p1: i64, p2: i64) -> Instruction {
        Instruction {
            p1,
            p2,
            ..Instruction::simple(opcode)
        }
    }

    pub fn text(opcode: Opcode, p4: impl Into<String>) -> Instruction {
        Instruction {
            p4: Some(p4.into()),
            ..Instruction::simple(opcode)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.p4 {
            Some(p4) => write!(f, "{:?}({}, {}, {}, {:?})", self.opcode, self.p1, self.p2, self.p3, p4),
            None => write!(f, "{:?}({}, {})", self.opcode, self.p1, self.p2),
        }
    }
}

/// A value on the machine stack: either a column value or a whole record.
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    Value(Value),
    Record(Record),
}

impl StackValue {
    fn is_truthy(&self) -> bool {
        match self {
            StackValue::Value(v) => v.is_truthy(),
            StackValue::Record(_) => true,
        }
    }
}

/// A stateful iterator over one b-tree, scoped to a single execution.
struct Cursor {
    tree_key: u32,
    btree: BTree,
    writable: bool,
    rows: Vec<(u64, Record)>,
    position: usize,
    valid: bool,
}

impl Cursor {
    fn new(tree_key: u32, btree: BTree, writable: bool) -> Cursor {
        Cursor {
            tree_key,
            btree,
            writable,
            rows: Vec::new(),
            position: 0,
            valid: false,
        }
    }

    fn rewind(&mut self, pager: &mut Pager) -> Result<()> {
        self.rows = self.btree.scan(pager)?;
        self.position = 0;
        self.valid = !self.rows.is_empty();
        Ok(())
    }

    /// Step to the next row. Returns whether the cursor still points at one.
    fn advance(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.position += 1;
        if self.position >= self.rows.len() {
            self.valid = false;
        }
        self.valid
    }

    fn seek(&mut self, pager: &mut Pager, key: u64) -> Result<bool> {
        if self.rows.is_empty() {
            self.rows = self.btree.scan(pager)?;
        }
        for (i, (k, _)) in self.rows.iter().enumerate() {
            if *k == key {
                self.position = i;
                self.valid = true;
                return Ok(true);
            }
        }
        self.valid = false;
        Ok(false)
    }

    fn key(&self) -> Option<u64> {
        if self.valid {
            self.rows.get(self.position).map(|(k, _)| *k)
        } else {
            None
        }
    }

    fn record(&self) -> Option<&Record> {
        if self.valid {
            self.rows.get(self.position).map(|(_, r)| r)
        } else {
            None
        }
    }
}

/// The byte-code interpreter. One instance lives per database handle; its
/// per-execution state is reset on every run while the tree cache survives
/// until the owner invalidates it.
pub struct Vm {
    cursors: HashMap<usize, Cursor>,
    btrees: HashMap<u32, BTree>,
    stack: Vec<StackValue>,
    results: Vec<Vec<StackValue>>,
    pc: usize,
    halted: bool,
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            cursors: HashMap::new(),
            btrees: HashMap::new(),
            stack: Vec::new(),
            results: Vec::new(),
            pc: 0,
            halted: false,
        }
    }

    /// Trees opened during execution, keyed by the root page they were
    /// opened with. A tree whose current root differs from its key was
    /// split at the root.
    pub fn trees(&self) -> &HashMap<u32, BTree> {
        &self.btrees
    }

    pub fn clear_tree_cache(&mut self) {
        self.btrees.clear();
    }

    pub fn execute(
        &mut self,
        pager: &mut Pager,
        program: &[Instruction],
    ) -> Result<Vec<Vec<StackValue>>> {
        self.cursors.clear();
        self.stack.clear();
        self.results.clear();
        self.pc = 0;
        self.halted = false;

        while self.pc < program.len() && !self.halted {
            let instruction = &program[self.pc];
            debug!("vm [{}]: {}", self.pc, instruction);

            match self.step(pager, instruction)? {
                Some(target) => self.pc = target,
                None => self.pc += 1,
            }
        }

        Ok(std::mem::take(&mut self.results))
    }

    fn step(&mut self, pager: &mut Pager, instr: &Instruction) -> Result<Option<usize>> {
        match instr.opcode {
            Opcode::OpenRead => self.op_open(instr.p1, instr.p2, false),
            Opcode::OpenWrite => self.op_open(instr.p1, instr.p2, true),
            Opcode::Close => {
                self.cursors.remove(&cursor_id(instr.p1)?);
                Ok(None)
            }
            Opcode::Rewind => {
                let target = jump_target(instr.p2)?;
                let cursor = self.cursor_mut(instr.p1)?;
                cursor.rewind(pager)?;
                if cursor.valid {
                    Ok(None)
                } else {
                    Ok(Some(target))
                }
            }
            Opcode::Next => {
                let target = jump_target(instr.p2)?;
                let cursor = self.cursor_mut(instr.p1)?;
                if cursor.advance() {
                    Ok(Some(target))
                } else {
                    Ok(None)
                }
            }
            Opcode::Seek => {
                let key = u64::try_from(instr.p2)
                    .map_err(|_| DbError::vm(format!("seek key {} is negative", instr.p2)))?;
                let cursor = self.cursor_mut(instr.p1)?;
                cursor.seek(pager, key)?;
                Ok(None)
            }
            Opcode::Key => {
                let key = self.cursor_mut(instr.p1)?.key();
                self.stack.push(match key {
                    Some(k) => StackValue::Value(Value::Int(k as i64)),
                    None => StackValue::Value(Value::Null),
                });
                Ok(None)
            }
            Opcode::Data => {
                let record = self.cursor_mut(instr.p1)?.record().cloned();
                self.stack.push(match record {
                    Some(r) => StackValue::Record(r),
                    None => StackValue::Value(Value::Null),
                });
                Ok(None)
            }
            Opcode::Column => {
                let index = usize::try_from(instr.p2)
                    .map_err(|_| DbError::vm("negative column index"))?;
                let value = match self.cursor_mut(instr.p1)?.record() {
                    Some(record) => record.get(index).cloned().unwrap_or(Value::Null),
                    None => Value::Null,
                };
                self.stack.push(StackValue::Value(value));
                Ok(None)
            }
            Opcode::Integer => {
                self.stack.push(StackValue::Value(Value::Int(instr.p1)));
                Ok(None)
            }
            Opcode::String => {
                let text = instr
                    .p4
                    .clone()
                    .ok_or_else(|| DbError::vm("string instruction without text operand"))?;
                self.stack.push(StackValue::Value(Value::Text(text)));
                Ok(None)
            }
            Opcode::Null => {
                self.stack.push(StackValue::Value(Value::Null));
                Ok(None)
            }
            Opcode::MakeRecord => self.op_make_record(instr.p1),
            Opcode::Insert => self.op_insert(pager, instr.p1),
            Opcode::Delete => self.op_delete(pager, instr.p1),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                self.op_compare(instr.opcode)
            }
            Opcode::Jump => Ok(Some(jump_target(instr.p1)?)),
            Opcode::JumpIfFalse => {
                let target = jump_target(instr.p1)?;
                let value = self.pop()?;
                if value.is_truthy() {
                    Ok(None)
                } else {
                    Ok(Some(target))
                }
            }
            Opcode::ResultRow => self.op_result_row(instr.p1),
            Opcode::Halt => {
                self.halted = true;
                Ok(None)
            }
        }
    }

    fn op_open(&mut self, cursor: i64, root_page: i64, writable: bool) -> Result<Option<usize>> {
        let cursor_id = cursor_id(cursor)?;
        let root = u32::try_from(root_page)
            .map_err(|_| DbError::vm(format!("invalid root page {root_page}")))?;

        let btree = *self.btrees.entry(root).or_insert_with(|| BTree::open(root));
        self.cursors
            .insert(cursor_id, Cursor::new(root, btree, writable));
        Ok(None)
    }

    fn op_make_record(&mut self, count: i64) -> Result<Option<usize>> {
        let count = usize::try_from(count)
            .map_err(|_| DbError::vm("negative record arity"))?;
        if self.stack.len() < count {
            return Err(DbError::vm(format!(
                "record construction needs {count} stack values, have {}",
                self.stack.len()
            )));
        }

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            match self.pop()? {
                StackValue::Value(v) => values.push(v),
                StackValue::Record(_) => {
                    return Err(DbError::vm("cannot nest a record inside a record"));
                }
            }
        }
        values.reverse();
        self.stack.push(StackValue::Record(Record::new(values)));
        Ok(None)
    }

    fn op_insert(&mut self, pager: &mut Pager, cursor: i64) -> Result<Option<usize>> {
        let record = match self.pop()? {
            StackValue::Record(r) => r,
            StackValue::Value(v) => {
                return Err(DbError::vm(format!("insert expects a record, got {v:?}")));
            }
        };
        let key = match self.pop()? {
            StackValue::Value(Value::Int(k)) if k >= 0 => k as u64,
            other => {
                return Err(DbError::vm(format!(
                    "insert expects a non-negative integer key, got {other:?}"
                )));
            }
        };

        let cursor = self.cursor_mut(cursor)?;
        if !cursor.writable {
            return Err(DbError::vm("cannot insert through a read-only cursor"));
        }
        cursor.btree.insert(pager, key, &record)?;

        // keep the cache entry in sync so root migration stays observable
        let (tree_key, btree) = (cursor.tree_key, cursor.btree);
        self.btrees.insert(tree_key, btree);
        Ok(None)
    }

    fn op_delete(&mut self, pager: &mut Pager, cursor: i64) -> Result<Option<usize>> {
        let cursor = self.cursor_mut(cursor)?;
        if !cursor.writable {
            return Err(DbError::vm("cannot delete through a read-only cursor"));
        }
        let key = cursor
            .key()
            .ok_or_else(|| DbError::vm("delete with cursor at no valid row"))?;

        cursor.btree.delete(pager, key)?;
        cursor.valid = false;

        let (tree_key, btree) = (cursor.tree_key, cursor.btree);
        self.btrees.insert(tree_key, btree);
        Ok(None)
    }

    fn op_compare(&mut self, opcode: Opcode) -> Result<Option<usize>> {
        let right = self.pop_value()?;
        let left = self.pop_value()?;

        let result = match opcode {
            Opcode::Eq => left.equals(&right),
            Opcode::Ne => !left.equals(&right),
            Opcode::Lt => matches!(left.compare(&right), Some(std::cmp::Ordering::Less)),
            Opcode::Le => matches!(
                left.compare(&right),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            Opcode::Gt => matches!(left.compare(&right), Some(std::cmp::Ordering::Greater)),
            Opcode::Ge => matches!(
                left.compare(&right),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            _ => return Err(DbError::vm(format!("{opcode:?} is not a comparison"))),
        };

        self.stack.push(StackValue::Value(Value::Bool(result)));
        Ok(None)
    }

    fn op_result_row(&mut self, count: i64) -> Result<Option<usize>> {
        let count = usize::try_from(count)
            .map_err(|_| DbError::vm("negative result arity"))?;
        if self.stack.len() < count {
            return Err(DbError::vm(format!(
                "result row needs {count} stack values, have {}",
                self.stack.len()
            )));
        }

        let mut row = Vec::with_capacity(count);
        for _ in 0..count {
            row.push(self.pop()?);
        }
        row.reverse();
        self.results.push(row);
        Ok(None)
    }

    fn cursor_mut(&mut self, id: i64) -> Result<&mut Cursor> {
        let id = cursor_id(id)?;
        self.cursors
            .get_mut(&id)
            .ok_or_else(|| DbError::vm(format!("cursor {id} is not open")))
    }

    fn pop(&mut self) -> Result<StackValue> {
        self.stack
            .pop()
            .ok_or_else(|| DbError::vm("stack underflow"))
    }

    fn pop_value(&mut self) -> Result<Value> {
        match self.pop()? {
            StackValue::Value(v) => Ok(v),
            StackValue::Record(_) => Err(DbError::vm("expected a value, found a record")),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

fn cursor_id(raw: i64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| DbError::vm(format!("invalid cursor id {raw}")))
}

fn jump_target(raw: i64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| DbError::vm(format!("invalid jump target {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::DEFAULT_PAGE_SIZE;
    use tempfile::NamedTempFile;

    fn open_fixture() -> (NamedTempFile, Pager, BTree) {
        let file = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(file.path(), DEFAULT_PAGE_SIZE).unwrap();
        let tree = BTree::create(&mut pager).unwrap();
        (file, pager, tree)
    }

    fn value_row(row: &[StackValue]) -> Vec<Value> {
        row.iter()
            .map(|sv| match sv {
                StackValue::Value(v) => v.clone(),
                StackValue::Record(_) => panic!("expected plain values"),
            })
            .collect()
    }

    #[test]
    fn test_insert_then_scan_program() {
        let (_f, mut pager, tree) = open_fixture();
        let root = tree.root_page() as i64;
        let mut vm = Vm::new();

        let insert = vec![
            Instruction::binary(Opcode::OpenWrite, 0, root),
            Instruction::unary(Opcode::Integer, 1),
            Instruction::unary(Opcode::Integer, 1),
            Instruction::text(Opcode::String, "Alice"),
            Instruction::unary(Opcode::MakeRecord, 2),
            Instruction::unary(Opcode::Insert, 0),
            Instruction::unary(Opcode::Close, 0),
            Instruction::simple(Opcode::Halt),
        ];
        assert!(vm.execute(&mut pager, &insert).unwrap().is_empty());

        let select = vec![
            Instruction::binary(Opcode::OpenRead, 0, root),
            Instruction::binary(Opcode::Rewind, 0, 5),
            Instruction::unary(Opcode::Data, 0),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::binary(Opcode::Next, 0, 2),
            Instruction::unary(Opcode::Close, 0),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &select).unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0][0] {
            StackValue::Record(record) => {
                assert_eq!(
                    record.values(),
                    &[Value::Int(1), Value::Text("Alice".into())]
                );
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_rewind_on_empty_tree_jumps() {
        let (_f, mut pager, tree) = open_fixture();
        let mut vm = Vm::new();

        // the jump target skips the result row entirely
        let program = vec![
            Instruction::binary(Opcode::OpenRead, 0, tree.root_page() as i64),
            Instruction::binary(Opcode::Rewind, 0, 5),
            Instruction::unary(Opcode::Data, 0),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::binary(Opcode::Next, 0, 2),
            Instruction::unary(Opcode::Close, 0),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_comparisons_and_conditional_jump() {
        let (_f, mut pager, _tree) = open_fixture();
        let mut vm = Vm::new();

        // 5 = 5 is truthy, so the result row survives
        let program = vec![
            Instruction::unary(Opcode::Integer, 5),
            Instruction::unary(Opcode::Integer, 5),
            Instruction::simple(Opcode::Eq),
            Instruction::unary(Opcode::JumpIfFalse, 6),
            Instruction::unary(Opcode::Integer, 99),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(value_row(&rows[0]), vec![Value::Int(99)]);

        // 3 > 7 is falsy, so the jump skips the result row
        let program = vec![
            Instruction::unary(Opcode::Integer, 3),
            Instruction::unary(Opcode::Integer, 7),
            Instruction::simple(Opcode::Gt),
            Instruction::unary(Opcode::JumpIfFalse, 6),
            Instruction::unary(Opcode::Integer, 99),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::simple(Opcode::Halt),
        ];
        assert!(vm.execute(&mut pager, &program).unwrap().is_empty());
    }

    #[test]
    fn test_string_comparison() {
        let (_f, mut pager, _tree) = open_fixture();
        let mut vm = Vm::new();

        let program = vec![
            Instruction::text(Opcode::String, "abc"),
            Instruction::text(Opcode::String, "abd"),
            Instruction::simple(Opcode::Lt),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert_eq!(value_row(&rows[0]), vec![Value::Bool(true)]);
    }

    #[test]
    fn test_mixed_type_comparison_is_false() {
        let (_f, mut pager, _tree) = open_fixture();
        let mut vm = Vm::new();

        let program = vec![
            Instruction::unary(Opcode::Integer, 1),
            Instruction::text(Opcode::String, "1"),
            Instruction::simple(Opcode::Lt),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert_eq!(value_row(&rows[0]), vec![Value::Bool(false)]);
    }

    #[test]
    fn test_seek_and_key() {
        let (_f, mut pager, mut tree) = open_fixture();
        for k in [2u64, 4, 6] {
            tree.insert(&mut pager, k, &Record::new(vec![Value::Int(k as i64 * 10)]))
                .unwrap();
        }
        let mut vm = Vm::new();

        let program = vec![
            Instruction::binary(Opcode::OpenRead, 0, tree.root_page() as i64),
            Instruction::binary(Opcode::Seek, 0, 4),
            Instruction::unary(Opcode::Key, 0),
            Instruction::unary(Opcode::Column, 0),
            Instruction::unary(Opcode::ResultRow, 2),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert_eq!(value_row(&rows[0]), vec![Value::Int(4), Value::Int(40)]);
    }

    #[test]
    fn test_column_out_of_range_pushes_null() {
        let (_f, mut pager, mut tree) = open_fixture();
        tree.insert(&mut pager, 1, &Record::new(vec![Value::Int(5)]))
            .unwrap();
        let mut vm = Vm::new();

        let program = vec![
            Instruction::binary(Opcode::OpenRead, 0, tree.root_page() as i64),
            Instruction::binary(Opcode::Rewind, 0, 4),
            Instruction::binary(Opcode::Column, 0, 9),
            Instruction::unary(Opcode::ResultRow, 1),
            Instruction::simple(Opcode::Halt),
        ];
        let rows = vm.execute(&mut pager, &program).unwrap();
        assert_eq!(value_row(&rows[0]), vec![Value::Null]);
    }

    #[test]
    fn test_insert_through_read_only_cursor_fails() {
        let (_f, mut pager, tree) = open_fixture();
        let mut vm = Vm::new();

        let program = vec![
            Instruction::binary(Opcode::OpenRead, 0, tree.root_page() as i64),
            Instruction::unary(Opcode::Integer, 1),
            Instruction::unary(Opcode::Integer, 2),
            Instruction::unary(Opcode::MakeRecord, 1),
            Instruction::unary(Opcode::Insert, 0),
            Instruction::simple(Opcode::Halt),
        ];
        assert!(matches!(
            vm.execute(&mut pager, &program),
            Err(DbError::Vm(_))
        ));
    }

    #[test]
    fn test_stack_underflow() {
        let (_f, mut pager, _tree) = open_fixture();
        let mut vm = Vm::new();

        let program = vec![Instruction::simple(Opcode::Eq)];
        assert!(matches!(
            vm.execute(&mut pager, &program),
            Err(DbError::Vm(_))
        ));
    }

    #[test]
    fn test_unknown_cursor() {
        let (_f, mut pager, _tree) = open_fixture();
        let mut vm = Vm::new();

        let program = vec![Instruction::binary(Opcode::Rewind, 3, 0)];
        assert!(matches!(
            vm.execute(&mut pager, &program),
            Err(DbError::Vm(_))
        ));
    }

    #[test]
    fn test_root_migration_visible_in_tree_cache() {
        let (_f, mut pager, tree) = open_fixture();
        let opened_as = tree.root_page();
        let mut vm = Vm::new();

        // enough inserts through one program to split the root leaf
        let mut program = vec![Instruction::binary(Opcode::OpenWrite, 0, opened_as as i64)];
        for key in 0..150 {
            program.push(Instruction::unary(Opcode::Integer, key));
            program.push(Instruction::unary(Opcode::Integer, key));
            program.push(Instruction::text(Opcode::String, format!("name-{key}")));
            program.push(Instruction::unary(Opcode::MakeRecord, 2));
            program.push(Instruction::unary(Opcode::Insert, 0));
        }
        program.push(Instruction::unary(Opcode::Close, 0));
        program.push(Instruction::simple(Opcode::Halt));

        vm.execute(&mut pager, &program).unwrap();

        let cached = vm.trees().get(&opened_as).copied().unwrap();
        assert_ne!(cached.root_page(), opened_as);

        // the migrated root still reaches every row
        let rows = cached.scan(&mut pager).unwrap();
        assert_eq!(rows.len(), 150);
    }

    #[test]
    fn test_delete_opcode_removes_current_row() {
        let (_f, mut pager, mut tree) = open_fixture();
        for k in 1u64..=3 {
            tree.insert(&mut pager, k, &Record::new(vec![Value::Int(k as i64)]))
                .unwrap();
        }
        let mut vm = Vm::new();

        let program = vec![
            Instruction::binary(Opcode::OpenWrite, 0, tree.root_page() as i64),
            Instruction::binary(Opcode::Rewind, 0, 3),
            Instruction::unary(Opcode::Delete, 0),
            Instruction::unary(Opcode::Close, 0),
            Instruction::simple(Opcode::Halt),
        ];
        vm.execute(&mut pager, &program).unwrap();

        let remaining: Vec<u64> = tree
            .scan(&mut pager)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(remaining, vec![2, 3]);
    }
}
