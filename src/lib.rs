//! A tiny Lisp on the classical SECD abstract machine.
//!
//! Source s-expressions are compiled into a small bytecode (a heap list of
//! integer opcodes and inline operands) and executed by a stack machine
//! with the four SECD registers. Every value lives in a uniform cell heap
//! managed by a precise mark-sweep collector; `Value` handles register
//! themselves as collection roots for exactly as long as they are alive.
//!
//! The usual round trip:
//!
//! ```
//! use secd::{Compiler, Reader, Runtime, Vm};
//!
//! let rt = Runtime::new();
//! let mut compiler = Compiler::new(&rt);
//! let mut vm = Vm::new(&rt);
//!
//! let form = Reader::new(&rt, "(+ 1 2)").read().unwrap().unwrap();
//! let code = compiler.compile(&form).unwrap();
//! let result = vm.run(&code).unwrap();
//! assert_eq!(result.as_integer(), 3);
//! ```

pub mod compiler;
pub mod error;
pub mod heap;
pub mod printer;
pub mod reader;
pub mod runtime;
pub mod symbol;
pub mod value;
pub mod vm;

pub use compiler::{Compiler, Opcode};
pub use error::{Error, Result};
pub use heap::{CellKind, HeapStats};
pub use printer::{display, print_code};
pub use reader::Reader;
pub use runtime::Runtime;
pub use value::Value;
pub use vm::{Console, StdConsole, Vm};
