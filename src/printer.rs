use std::fmt::Write;

use crate::compiler::Opcode;
use crate::heap::CellKind;
use crate::runtime::Runtime;
use crate::value::Value;

/// Print a value to a string: integers as decimals, symbols as their
/// names, lists as `(a b c)` with a `. tail` for improper lists.
pub fn display(rt: &Runtime, value: &Value) -> String {
    let mut out = String::new();
    write_value(rt, value, &mut out);
    out
}

fn write_value(rt: &Runtime, value: &Value, out: &mut String) {
    match value.kind() {
        CellKind::Integer => {
            let _ = write!(out, "{}", value.as_integer());
        }
        CellKind::Symbol => out.push_str(&rt.symbol_name(value)),
        CellKind::Closure => out.push_str("#<closure>"),
        CellKind::Cons => {
            out.push('(');
            write_value(rt, &value.car(), out);
            let mut tail = value.cdr();
            while tail.is_cons() {
                out.push(' ');
                write_value(rt, &tail.car(), out);
                tail = tail.cdr();
            }
            if !tail.is_nil() {
                out.push_str(" . ");
                write_value(rt, &tail, out);
            }
            out.push(')');
        }
    }
}

/// Disassemble a bytecode list into readable text. Nested bodies (SEL
/// arms, LDF bodies) are indented by four columns; the SEL arms are
/// separated by an `else` line. Not meant to be machine-readable.
pub fn print_code(rt: &Runtime, code: &Value) -> String {
    let mut out = String::new();
    write_code(rt, code, 0, &mut out);
    out
}

fn write_code(rt: &Runtime, code: &Value, indent: usize, out: &mut String) {
    let mut rest = code.clone();
    while rest.is_cons() {
        let word = rest.car();
        rest = rest.cdr();
        for _ in 0..indent {
            out.push(' ');
        }
        if !word.is_integer() {
            let _ = writeln!(out, "!!! opcode expected, got {}", display(rt, &word));
            continue;
        }
        let op = match Opcode::from_i64(word.as_integer()) {
            Some(op) => op,
            None => {
                let _ = writeln!(out, "!!! undefined opcode {}", word.as_integer());
                continue;
            }
        };
        match op {
            Opcode::Ldc | Opcode::Ld => {
                let operand = if rest.is_cons() {
                    let operand = rest.car();
                    rest = rest.cdr();
                    display(rt, &operand)
                } else {
                    "???".to_string()
                };
                let _ = writeln!(out, "{} {}", op.mnemonic(), operand);
            }
            Opcode::Sel => {
                let _ = writeln!(out, "{}", op.mnemonic());
                if rest.is_cons() {
                    let then_branch = rest.car();
                    rest = rest.cdr();
                    write_code(rt, &then_branch, indent + 4, out);
                }
                for _ in 0..indent {
                    out.push(' ');
                }
                let _ = writeln!(out, "else");
                if rest.is_cons() {
                    let else_branch = rest.car();
                    rest = rest.cdr();
                    write_code(rt, &else_branch, indent + 4, out);
                }
            }
            Opcode::Ldf => {
                let _ = writeln!(out, "{}", op.mnemonic());
                if rest.is_cons() {
                    let body = rest.car();
                    rest = rest.cdr();
                    write_code(rt, &body, indent + 4, out);
                }
            }
            _ => {
                let _ = writeln!(out, "{}", op.mnemonic());
            }
        }
    }
}
