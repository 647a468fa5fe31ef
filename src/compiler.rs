use string_interner::DefaultSymbol;

use crate::error::{Error, Result};
use crate::heap::CellKind;
use crate::runtime::Runtime;
use crate::value::Value;

/// The bytecode instruction set. Numeric values are frozen for
/// cross-implementation interchange; the gaps are intentional.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i64)]
pub enum Opcode {
    Nil = 0,
    Ldc = 1,
    Ld = 2,
    Sel = 3,
    Join = 4,
    Ldf = 5,
    Ap = 6,
    Rtn = 7,
    Dum = 8,
    Rap = 9,
    Defun = 10,
    Pop = 11,

    Cons = 90,
    Car = 91,
    Cdr = 92,
    Consp = 94,

    Add = 100,
    Sub = 101,
    Mul = 102,
    Div = 103,
    Eq = 104,
    Lt = 105,
    Gt = 106,

    Print = 110,
    Read = 111,
}

impl Opcode {
    pub fn from_i64(code: i64) -> Option<Opcode> {
        use Opcode::*;
        Some(match code {
            0 => Nil,
            1 => Ldc,
            2 => Ld,
            3 => Sel,
            4 => Join,
            5 => Ldf,
            6 => Ap,
            7 => Rtn,
            8 => Dum,
            9 => Rap,
            10 => Defun,
            11 => Pop,
            90 => Cons,
            91 => Car,
            92 => Cdr,
            94 => Consp,
            100 => Add,
            101 => Sub,
            102 => Mul,
            103 => Div,
            104 => Eq,
            105 => Lt,
            106 => Gt,
            110 => Print,
            111 => Read,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nil => "NIL",
            Ldc => "LDC",
            Ld => "LD",
            Sel => "SEL",
            Join => "JOIN",
            Ldf => "LDF",
            Ap => "AP",
            Rtn => "RTN",
            Dum => "DUM",
            Rap => "RAP",
            Defun => "DEFUN",
            Pop => "POP",
            Cons => "CONS",
            Car => "CAR",
            Cdr => "CDR",
            Consp => "CONSP",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Eq => "EQ",
            Lt => "LT",
            Gt => "GT",
            Print => "PRINT",
            Read => "READ",
        }
    }
}

/// One lexical scope at compile time: the bound names in binding order.
/// The position of a name is its runtime offset within the frame.
struct Frame {
    names: Vec<DefaultSymbol>,
}

/// Translates s-expressions into bytecode lists, resolving variables to
/// `(depth . offset)` coordinates along the way.
///
/// The compiler is long-lived: its global frame persists between calls so
/// that names introduced by `defun` resolve in later programs. A compile
/// error discards all in-progress code buffers and every frame but the
/// global one before it is reported.
pub struct Compiler<'rt> {
    rt: &'rt Runtime,
    frames: Vec<Frame>,
    buffers: Vec<Vec<Value>>,
}

impl<'rt> Compiler<'rt> {
    pub fn new(rt: &'rt Runtime) -> Compiler<'rt> {
        Compiler {
            rt,
            frames: vec![Frame { names: Vec::new() }],
            buffers: Vec::new(),
        }
    }

    /// Compile one top-level form into a bytecode value.
    pub fn compile(&mut self, source: &Value) -> Result<Value> {
        debug_assert_eq!(self.frames.len(), 1, "global frame expected between compilations");
        debug_assert!(self.buffers.is_empty(), "leftover code buffer detected");
        self.buffers.push(Vec::new());
        match self.compile_form(source) {
            Ok(()) => {
                let buffer = self.buffers.pop().expect("top-level code buffer");
                debug_assert!(self.buffers.is_empty());
                Ok(self.rt.list(&buffer))
            }
            Err(err) => {
                self.buffers.clear();
                self.frames.truncate(1);
                Err(err)
            }
        }
    }

    fn compile_form(&mut self, form: &Value) -> Result<()> {
        match form.kind() {
            CellKind::Integer => {
                self.emit(Opcode::Ldc);
                self.emit_operand(form.clone());
            }
            CellKind::Symbol => {
                if form.is_nil() {
                    self.emit(Opcode::Nil);
                } else if *form == self.rt.syms.t {
                    self.emit(Opcode::Ldc);
                    self.emit_operand(self.rt.true_value());
                } else {
                    let coord = self.lookup(form)?;
                    self.emit(Opcode::Ld);
                    self.emit_operand(coord);
                }
            }
            CellKind::Cons => self.compile_call(form)?,
            CellKind::Closure => {
                return Err(Error::Malformed(
                    "closures cannot appear in source".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// A cons form is either a special form, a primitive, or a general
    /// call, decided by the identity of its head symbol. The head keeps
    /// its special meaning even when a binding shadows the name.
    fn compile_call(&mut self, form: &Value) -> Result<()> {
        let rt = self.rt;
        let head = form.car();
        let args = form.cdr();
        if !head.is_symbol() {
            return self.compile_application(&head, &args);
        }
        let s = &rt.syms;
        if head == s.cons {
            self.compile_binary(Opcode::Cons, "cons", &args)
        } else if head == s.car {
            self.compile_unary(Opcode::Car, "car", &args)
        } else if head == s.cdr {
            self.compile_unary(Opcode::Cdr, "cdr", &args)
        } else if head == s.consp {
            self.compile_unary(Opcode::Consp, "consp", &args)
        } else if head == s.add {
            self.compile_binary(Opcode::Add, "+", &args)
        } else if head == s.sub {
            self.compile_binary(Opcode::Sub, "-", &args)
        } else if head == s.mul {
            self.compile_binary(Opcode::Mul, "*", &args)
        } else if head == s.div {
            self.compile_binary(Opcode::Div, "/", &args)
        } else if head == s.eq {
            self.compile_binary(Opcode::Eq, "eq", &args)
        } else if head == s.lt {
            self.compile_binary(Opcode::Lt, "<", &args)
        } else if head == s.gt {
            self.compile_binary(Opcode::Gt, ">", &args)
        } else if head == s.print {
            self.compile_unary(Opcode::Print, "print", &args)
        } else if head == s.read {
            self.compile_read(&args)
        } else if head == s.if_ {
            self.compile_if(&args)
        } else if head == s.lambda {
            self.compile_lambda(&args)
        } else if head == s.quote {
            self.compile_quote(&args)
        } else if head == s.apply {
            self.compile_apply(&args)
        } else if head == s.defun {
            self.compile_defun(&args)
        } else if head == s.let_ {
            self.compile_let(&args)
        } else if head == s.letrec {
            self.compile_letrec(&args)
        } else if head == s.progn {
            self.compile_progn(&args)
        } else {
            self.compile_application(&head, &args)
        }
    }

    fn compile_unary(&mut self, op: Opcode, form: &str, args: &Value) -> Result<()> {
        let arg = expect_1(form, "exactly 1 argument", args)?;
        self.compile_form(&arg)?;
        self.emit(op);
        Ok(())
    }

    /// Binary primitives compile right operand first, so the left operand
    /// is the first pop at runtime.
    fn compile_binary(&mut self, op: Opcode, form: &str, args: &Value) -> Result<()> {
        let (lhs, rhs) = expect_2(form, "exactly 2 arguments", args)?;
        self.compile_form(&rhs)?;
        self.compile_form(&lhs)?;
        self.emit(op);
        Ok(())
    }

    fn compile_read(&mut self, args: &Value) -> Result<()> {
        if !args.is_nil() {
            return Err(arity("read", "no arguments"));
        }
        self.emit(Opcode::Read);
        Ok(())
    }

    /// Quote loads its argument verbatim as a constant.
    fn compile_quote(&mut self, args: &Value) -> Result<()> {
        let arg = expect_1("quote", "exactly 1 argument", args)?;
        self.emit(Opcode::Ldc);
        self.emit_operand(arg);
        Ok(())
    }

    fn compile_if(&mut self, args: &Value) -> Result<()> {
        let (cond, then_branch, else_branch) =
            expect_3("if", "a condition and two branches", args)?;
        self.compile_form(&cond)?;
        self.emit(Opcode::Sel);
        self.compile_branch(&then_branch)?;
        self.compile_branch(&else_branch)?;
        Ok(())
    }

    /// Compile one SEL arm into its own code buffer and embed the result
    /// as an operand of the parent buffer.
    fn compile_branch(&mut self, form: &Value) -> Result<()> {
        self.buffers.push(Vec::new());
        self.compile_form(form)?;
        self.emit(Opcode::Join);
        let buffer = self.buffers.pop().expect("branch code buffer");
        let body = self.rt.list(&buffer);
        self.emit_operand(body);
        Ok(())
    }

    fn compile_lambda(&mut self, args: &Value) -> Result<()> {
        let (params, body) = expect_2("lambda", "a parameter list and a body", args)?;
        self.compile_lambda_parts(&params, &body)
    }

    fn compile_lambda_parts(&mut self, params: &Value, body: &Value) -> Result<()> {
        self.emit(Opcode::Ldf);
        self.buffers.push(Vec::new());
        self.enter_frame(params)?;
        self.compile_form(body)?;
        self.emit(Opcode::Rtn);
        let buffer = self.buffers.pop().expect("function code buffer");
        let compiled = self.rt.list(&buffer);
        self.emit_operand(compiled);
        self.leave_frame();
        Ok(())
    }

    fn compile_apply(&mut self, args: &Value) -> Result<()> {
        let (func, arg_form) = expect_2("apply", "a function and an argument list", args)?;
        // The argument expression is packed as a one-element argument
        // list, exactly like a unary call would pack it.
        self.emit(Opcode::Nil);
        self.compile_form(&arg_form)?;
        self.emit(Opcode::Cons);
        self.compile_form(&func)?;
        self.emit(Opcode::Ap);
        Ok(())
    }

    fn compile_let(&mut self, args: &Value) -> Result<()> {
        let (names, values, body) = expect_3("let", "names, values and a body", args)?;
        self.compile_function_args(&values)?;
        self.compile_lambda_parts(&names, &body)?;
        self.emit(Opcode::Ap);
        Ok(())
    }

    /// letrec binds its names around the value expressions so the values
    /// can refer to each other; DUM/RAP wire the cycle up at runtime.
    fn compile_letrec(&mut self, args: &Value) -> Result<()> {
        self.emit(Opcode::Dum);
        let (names, values, body) = expect_3("letrec", "names, values and a body", args)?;
        self.enter_frame(&names)?;
        self.compile_function_args(&values)?;
        self.compile_lambda_parts(&names, &body)?;
        self.emit(Opcode::Rap);
        self.leave_frame();
        Ok(())
    }

    fn compile_progn(&mut self, args: &Value) -> Result<()> {
        if args.is_nil() {
            self.emit(Opcode::Nil);
            return Ok(());
        }
        let mut rest = args.clone();
        loop {
            if !rest.is_cons() {
                return Err(Error::Malformed("improper progn body".to_string()));
            }
            self.compile_form(&rest.car())?;
            rest = rest.cdr();
            if rest.is_nil() {
                break;
            }
            self.emit(Opcode::Pop);
        }
        Ok(())
    }

    /// `defun` is only meaningful at global scope, where its DEFUN opcode
    /// can append the closure to the global frame. The name is added to
    /// the global compile-time frame before the body is compiled so the
    /// function can call itself.
    fn compile_defun(&mut self, args: &Value) -> Result<()> {
        if self.buffers.len() != 1 {
            return Err(Error::DefunAtLocalScope);
        }
        let name = args
            .try_car()
            .map_err(|_| arity("defun", "a name, a parameter list and a body"))?;
        if !name.is_symbol() {
            return Err(Error::Malformed(format!(
                "function name must be a symbol, got {}",
                name.kind_name()
            )));
        }
        self.frames[0].names.push(name.symbol_key());
        let rest = args.cdr();
        let (params, body) = expect_2("defun", "a name, a parameter list and a body", &rest)?;
        self.compile_lambda_parts(&params, &body)?;
        self.emit(Opcode::Defun);
        Ok(())
    }

    /// General call: build the argument list right to left so it comes out
    /// left to right at runtime, then apply the callee.
    fn compile_application(&mut self, func: &Value, args: &Value) -> Result<()> {
        self.compile_function_args(args)?;
        self.compile_form(func)?;
        self.emit(Opcode::Ap);
        Ok(())
    }

    fn compile_function_args(&mut self, args: &Value) -> Result<()> {
        self.emit(Opcode::Nil);
        self.compile_call_arguments(args)
    }

    fn compile_call_arguments(&mut self, args: &Value) -> Result<()> {
        if args.is_nil() {
            return Ok(());
        }
        if !args.is_cons() {
            return Err(Error::Malformed(
                "improper argument list in call".to_string(),
            ));
        }
        self.compile_call_arguments(&args.cdr())?;
        self.compile_form(&args.car())?;
        self.emit(Opcode::Cons);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Compile-time environment
    // ------------------------------------------------------------------

    fn enter_frame(&mut self, params: &Value) -> Result<()> {
        let mut names = Vec::new();
        let mut rest = params.clone();
        while !rest.is_nil() {
            if !rest.is_cons() {
                return Err(Error::Malformed(
                    "parameter list must be a proper list".to_string(),
                ));
            }
            let name = rest.car();
            if !name.is_symbol() {
                return Err(Error::Malformed(format!(
                    "parameter name must be a symbol, got {}",
                    name.kind_name()
                )));
            }
            names.push(name.symbol_key());
            rest = rest.cdr();
        }
        self.frames.push(Frame { names });
        Ok(())
    }

    fn leave_frame(&mut self) {
        self.frames.pop();
        debug_assert!(!self.frames.is_empty(), "global frame popped");
    }

    /// Resolve a name to `(depth . offset)`, searching frames innermost
    /// first.
    fn lookup(&self, name: &Value) -> Result<Value> {
        let key = name.symbol_key();
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            if let Some(offset) = frame.names.iter().position(|&n| n == key) {
                let coord = Value::cons(
                    &self.rt.integer(depth as i64),
                    &self.rt.integer(offset as i64),
                );
                return Ok(coord);
            }
        }
        Err(Error::UnknownVariable(self.rt.symbol_name(name)))
    }

    // ------------------------------------------------------------------
    // Code buffers
    // ------------------------------------------------------------------

    fn emit(&mut self, op: Opcode) {
        let cell = self.rt.integer(op as i64);
        self.buffers.last_mut().expect("active code buffer").push(cell);
    }

    fn emit_operand(&mut self, value: Value) {
        self.buffers.last_mut().expect("active code buffer").push(value);
    }
}

fn arity(form: &str, expected: &'static str) -> Error {
    Error::Arity {
        form: form.to_string(),
        expected,
    }
}

fn expect_1(form: &str, expected: &'static str, args: &Value) -> Result<Value> {
    let first = args.try_car().map_err(|_| arity(form, expected))?;
    if !args.cdr().is_nil() {
        return Err(arity(form, expected));
    }
    Ok(first)
}

fn expect_2(form: &str, expected: &'static str, args: &Value) -> Result<(Value, Value)> {
    let first = args.try_car().map_err(|_| arity(form, expected))?;
    let rest = args.cdr();
    let second = rest.try_car().map_err(|_| arity(form, expected))?;
    if !rest.cdr().is_nil() {
        return Err(arity(form, expected));
    }
    Ok((first, second))
}

fn expect_3(form: &str, expected: &'static str, args: &Value) -> Result<(Value, Value, Value)> {
    let first = args.try_car().map_err(|_| arity(form, expected))?;
    let rest = args.cdr();
    let second = rest.try_car().map_err(|_| arity(form, expected))?;
    let rest = rest.cdr();
    let third = rest.try_car().map_err(|_| arity(form, expected))?;
    if !rest.cdr().is_nil() {
        return Err(arity(form, expected));
    }
    Ok((first, second, third))
}
