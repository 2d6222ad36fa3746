/*
Translates optimized statements into machine programs.

SELECT compiles to the canonical scan loop:

  0  OPEN_READ   0, root
  1  REWIND      0, <close>      jump when the tree is empty
  2  DATA        0               loop head
     ...where instructions...
     JUMP_IF_FALSE <next>        row filtered out
     RESULT_ROW  1
     NEXT        0, 2            back to the loop head while rows remain
     CLOSE       0
     HALT

INSERT compiles to OPEN_WRITE, the key push, the value pushes, MAKE_RECORD,
INSERT, CLOSE, HALT. UPDATE, DELETE and CREATE TABLE are executed by the
controller; their generated programs are a bare HALT.

WHERE identifiers compile to COLUMN fetches against the scan cursor, and
AND/OR lower to short-circuit jumps, so the loop never needs opcodes beyond
the fixed set.
*/

use std::collections::BTreeMap;

use log::debug;

use crate::errors::{DbError, Result};
use crate::record::Value;
use crate::schema::TableMetadata;
use crate::sql::parser::{
    BinaryOperator, Expr, InsertStatement, SelectStatement, Statement,
};
use crate::vm::{Instruction, Opcode};

/// The single cursor used by generated single-table programs.
const SCAN_CURSOR: i64 = 0;

pub struct CodeGenerator {
    // key source for inserts into tables with no declared primary key
    next_auto_key: u64,
}

impl CodeGenerator {
    pub fn new() -> CodeGenerator {
        CodeGenerator { next_auto_key: 1 }
    }

    pub fn generate(
        &mut self,
        statement: &Statement,
        tables: &mut BTreeMap<String, TableMetadata>,
    ) -> Result<Vec<Instruction>> {
        match statement {
            Statement::Select(stmt) => {
                debug!("codegen: SELECT on '{}'", stmt.table);
                generate_select(stmt, tables)
            }
            Statement::Insert(stmt) => {
                debug!("codegen: INSERT into '{}'", stmt.table);
                self.generate_insert(stmt, tables)
            }
            // executed directly by the controller
            Statement::CreateTable(_)
            | Statement::Update(_)
            | Statement::Delete(_)
            | Statement::DropTable(_)
            | Statement::AlterTable(_) => Ok(vec![Instruction::simple(Opcode::Halt)]),
        }
    }

    fn generate_insert(
        &mut self,
        stmt: &InsertStatement,
        tables: &mut BTreeMap<String, TableMetadata>,
    ) -> Result<Vec<Instruction>> {
        let meta = tables
            .get_mut(&stmt.table)
            .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

        if stmt.values.len() != meta.columns.len() {
            return Err(DbError::schema(format!(
                "table '{}' has {} columns but {} values were supplied",
                stmt.table,
                meta.columns.len(),
                stmt.values.len()
            )));
        }

        let mut values = stmt.values.clone();
        let key = match meta.primary_key_index {
            Some(pk_index) => match &values[pk_index] {
                Value::Int(v) if *v >= 0 => *v as u64,
                Value::Int(v) => {
                    return Err(DbError::schema(format!(
                        "primary key value {v} must be non-negative"
                    )));
                }
                Value::Null => {
                    // draw from the table counter and materialize the key
                    // into the stored row
                    let key = meta.next_auto_increment;
                    meta.next_auto_increment += 1;
                    values[pk_index] = Value::Int(key as i64);
                    key
                }
                other => {
                    return Err(DbError::schema(format!(
                        "primary key value must be an integer, got {other:?}"
                    )));
                }
            },
            None => {
                let key = self.next_auto_key;
                self.next_auto_key += 1;
                key
            }
        };

        let mut program = vec![
            Instruction::binary(Opcode::OpenWrite, SCAN_CURSOR, meta.root_page as i64),
            Instruction::unary(Opcode::Integer, key as i64),
        ];
        for value in &values {
            program.push(push_literal(value)?);
        }
        program.push(Instruction::unary(Opcode::MakeRecord, values.len() as i64));
        program.push(Instruction::unary(Opcode::Insert, SCAN_CURSOR));
        program.push(Instruction::unary(Opcode::Close, SCAN_CURSOR));
        program.push(Instruction::simple(Opcode::Halt));
        Ok(program)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        CodeGenerator::new()
    }
}

fn generate_select(
    stmt: &SelectStatement,
    tables: &BTreeMap<String, TableMetadata>,
) -> Result<Vec<Instruction>> {
    let meta = tables
        .get(&stmt.table)
        .ok_or_else(|| DbError::schema(format!("no such table: {}", stmt.table)))?;

    let mut program = vec![
        Instruction::binary(Opcode::OpenRead, SCAN_CURSOR, meta.root_page as i64),
        Instruction::binary(Opcode::Rewind, SCAN_CURSOR, 0), // target patched below
    ];
    let rewind_index = 1;
    let loop_start = program.len();

    program.push(Instruction::unary(Opcode::Data, SCAN_CURSOR));

    let mut filter_jump = None;
    if let Some(where_clause) = &stmt.where_clause {
        generate_expr(where_clause, meta, &mut program)?;
        filter_jump = Some(program.len());
        program.push(Instruction::unary(Opcode::JumpIfFalse, 0)); // target patched below
    }

    // projection of named columns happens in the controller; the loop
    // always publishes the whole record
    program.push(Instruction::unary(Opcode::ResultRow, 1));

    let next_index = program.len();
    program.push(Instruction::binary(Opcode::Next, SCAN_CURSOR, loop_start as i64));
    let close_index = program.len();
    program.push(Instruction::unary(Opcode::Close, SCAN_CURSOR));
    program.push(Instruction::simple(Opcode::Halt));

    program[rewind_index].p2 = close_index as i64;
    if let Some(index) = filter_jump {
        program[index].p1 = next_index as i64;
    }
    Ok(program)
}

/// Emit instructions that leave the value of `expr` on the stack.
fn generate_expr(
    expr: &Expr,
    meta: &TableMetadata,
    program: &mut Vec<Instruction>,
) -> Result<()> {
    match expr {
        Expr::Literal(value) => {
            program.push(push_literal(value)?);
            Ok(())
        }
        Expr::Column(name) => {
            let index = meta.column_index(name).ok_or_else(|| {
                DbError::schema(format!(
                    "no such column '{name}' in table '{}'",
                    meta.name
                ))
            })?;
            program.push(Instruction::binary(Opcode::Column, SCAN_CURSOR, index as i64));
            Ok(())
        }
        Expr::Binary { left, op, right } => match op {
            BinaryOperator::And => {
                generate_expr(left, meta, program)?;
                let bail_index = program.len();
                program.push(Instruction::unary(Opcode::JumpIfFalse, 0));
                generate_expr(right, meta, program)?;
                let done_index = program.len();
                program.push(Instruction::unary(Opcode::Jump, 0));
                // falsy left operand collapses the whole conjunction
                program[bail_index].p1 = program.len() as i64;
                program.push(Instruction::unary(Opcode::Integer, 0));
                program[done_index].p1 = program.len() as i64;
                Ok(())
            }
            BinaryOperator::Or => {
                generate_expr(left, meta, program)?;
                let try_right_index = program.len();
                program.push(Instruction::unary(Opcode::JumpIfFalse, 0));
                program.push(Instruction::unary(Opcode::Integer, 1));
                let done_index = program.len();
                program.push(Instruction::unary(Opcode::Jump, 0));
                program[try_right_index].p1 = program.len() as i64;
                generate_expr(right, meta, program)?;
                program[done_index].p1 = program.len() as i64;
                Ok(())
            }
            _ => {
                generate_expr(left, meta, program)?;
                generate_expr(right, meta, program)?;
                program.push(Instruction::simple(comparison_opcode(*op)?));
                Ok(())
            }
        },
    }
}

fn comparison_opcode(op: BinaryOperator) -> Result<Opcode> {
    match op {
        BinaryOperator::Eq => Ok(Opcode::Eq),
        BinaryOperator::Ne => Ok(Opcode::Ne),
        BinaryOperator::Lt => Ok(Opcode::Lt),
        BinaryOperator::Le => Ok(Opcode::Le),
        BinaryOperator::Gt => Ok(Opcode::Gt),
        BinaryOperator::Ge => Ok(Opcode::Ge),
        other => Err(DbError::vm(format!(
            "operator {} has no comparison opcode",
            other.as_str()
        ))),
    }
}

fn push_literal(value: &Value) -> Result<Instruction> {
    Ok(match value {
        Value::Null => Instruction::simple(Opcode::Null),
        Value::Bool(b) => Instruction::unary(Opcode::Integer, if *b { 1 } else { 0 }),
        Value::Int(v) => Instruction::unary(Opcode::Integer, *v),
        // the machine has no float push; literal floats ride as truncated
        // integers, matching the storage fast paths handled elsewhere
        Value::Float(v) => Instruction::unary(Opcode::Integer, *v as i64),
        Value::Text(v) => Instruction::text(Opcode::String, v.clone()),
        Value::Blob(_) => {
            return Err(DbError::vm("blob literals cannot be pushed"));
        }
    })
}
