/*
AST rewrites applied before code generation:

  constant folding   a binary operator over two literals is evaluated at
                     compile time, unless the value pair has no defined
                     result (the node is then left alone)
  simplification     x = x over one identifier becomes TRUE, x != x FALSE

Only SELECT and INSERT flow through here; the other statements are executed
directly by the controller and never reach the code generator.
*/

use crate::record::Value;
use crate::sql::parser::{BinaryOperator, Expr, Statement};

pub fn optimize(statement: Statement) -> Statement {
    match statement {
        Statement::Select(mut stmt) => {
            stmt.where_clause = stmt.where_clause.map(optimize_expr);
            Statement::Select(stmt)
        }
        other => other,
    }
}

pub fn optimize_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { left, op, right } => {
            let left = optimize_expr(*left);
            let right = optimize_expr(*right);

            if let (Expr::Literal(lv), Expr::Literal(rv)) = (&left, &right) {
                if let Some(folded) = fold_constants(lv, op, rv) {
                    return Expr::Literal(folded);
                }
            }

            // the same identifier on both sides decides = and != outright
            if expressions_equal(&left, &right) {
                match op {
                    BinaryOperator::Eq => return Expr::Literal(Value::Bool(true)),
                    BinaryOperator::Ne => return Expr::Literal(Value::Bool(false)),
                    _ => {}
                }
            }

            Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            }
        }
        other => other,
    }
}

fn fold_constants(left: &Value, op: BinaryOperator, right: &Value) -> Option<Value> {
    use std::cmp::Ordering;

    let folded = match op {
        BinaryOperator::Eq => Value::Bool(left.equals(right)),
        BinaryOperator::Ne => Value::Bool(!left.equals(right)),
        BinaryOperator::Lt => Value::Bool(left.compare(right)? == Ordering::Less),
        BinaryOperator::Le => Value::Bool(left.compare(right)? != Ordering::Greater),
        BinaryOperator::Gt => Value::Bool(left.compare(right)? == Ordering::Greater),
        BinaryOperator::Ge => Value::Bool(left.compare(right)? != Ordering::Less),
        // logical folds keep the deciding operand's value
        BinaryOperator::And => {
            if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOperator::Or => {
            if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
    };
    Some(folded)
}

fn expressions_equal(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Column(n1), Expr::Column(n2)) => n1 == n2,
        (Expr::Literal(v1), Expr::Literal(v2)) => v1.equals(v2),
        (
            Expr::Binary {
                left: l1,
                op: o1,
                right: r1,
            },
            Expr::Binary {
                left: l2,
                op: o2,
                right: r2,
            },
        ) => o1 == o2 && expressions_equal(l1, l2) && expressions_equal(r1, r2),
        _ => false,
    }
}
