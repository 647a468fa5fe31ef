use std::io::{self, BufRead, Write};

use crate::compiler::Opcode;
use crate::error::{Error, Result};
use crate::printer;
use crate::runtime::Runtime;
use crate::value::Value;

/// The I/O seam for the READ and PRINT instructions: one integer in, one
/// line of text out.
pub trait Console {
    /// Obtain one decimal integer from the input source.
    fn read_integer(&mut self) -> Result<i64>;
    /// Emit one line of text to the output sink.
    fn print(&mut self, text: &str) -> Result<()>;
}

/// Console backed by process stdin/stdout.
pub struct StdConsole;

impl Console for StdConsole {
    fn read_integer(&mut self) -> Result<i64> {
        print!("Please enter an integer number: ");
        io::stdout().flush().map_err(|e| Error::Io(e.to_string()))?;
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| Error::Io(e.to_string()))?;
        if read == 0 {
            return Err(Error::Read("end of input while reading an integer".into()));
        }
        let word = line.trim();
        word.parse::<i64>()
            .map_err(|_| Error::Read(format!("expected an integer, got '{}'", word)))
    }

    fn print(&mut self, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }
}

/// The SECD virtual machine: four registers and an instruction loop.
///
/// S holds operands, E the chain of activation frames, C the remaining
/// bytecode and D the saved contexts of calls and conditionals. The
/// machine is long-lived: E keeps its global frame between programs, so
/// DEFUN-made definitions stay visible. A runtime error resets S, C and D
/// and trims E back to the global frame before it is reported.
pub struct Vm<'rt> {
    rt: &'rt Runtime,
    console: Box<dyn Console>,
    s: Value,
    e: Value,
    c: Value,
    d: Value,
}

impl<'rt> Vm<'rt> {
    pub fn new(rt: &'rt Runtime) -> Vm<'rt> {
        Vm::with_console(rt, Box::new(StdConsole))
    }

    pub fn with_console(rt: &'rt Runtime, console: Box<dyn Console>) -> Vm<'rt> {
        Vm {
            rt,
            console,
            s: rt.nil(),
            // One empty frame: the global environment.
            e: Value::cons(&rt.nil(), &rt.nil()),
            c: rt.nil(),
            d: rt.nil(),
        }
    }

    /// Execute a compiled program to completion and return the single
    /// value it leaves on the stack.
    pub fn run(&mut self, code: &Value) -> Result<Value> {
        debug_assert!(
            self.c.is_nil(),
            "control register should be empty between programs"
        );
        self.c = code.clone();
        match self.exec() {
            Ok(value) => Ok(value),
            Err(err) => {
                self.recover();
                Err(err)
            }
        }
    }

    fn exec(&mut self) -> Result<Value> {
        while !self.c.is_nil() {
            let op = self.fetch_opcode()?;
            self.step(op)?;
        }
        let result = self.pop_s()?;
        if !self.s.is_nil() {
            return Err(Error::Program("values left on the stack".into()));
        }
        Ok(result)
    }

    fn step(&mut self, op: Opcode) -> Result<()> {
        match op {
            Opcode::Nil => {
                let nil = self.rt.nil();
                self.push_s(&nil);
            }
            Opcode::Ldc => {
                let constant = self.fetch()?;
                self.push_s(&constant);
            }
            Opcode::Ld => {
                let coord = self.fetch()?;
                let value = self.locate(&coord)?;
                self.push_s(&value);
            }
            Opcode::Sel => {
                let cond = self.pop_s()?;
                let then_branch = self.fetch()?;
                let else_branch = self.fetch()?;
                self.d = Value::cons(&self.c, &self.d);
                self.c = if cond.is_truthy() {
                    then_branch
                } else {
                    else_branch
                };
            }
            Opcode::Join => {
                self.c = self.pop_d()?;
            }
            Opcode::Ldf => {
                let body = self.fetch()?;
                let closure = Value::closure(&body, &self.e);
                self.push_s(&closure);
            }
            Opcode::Ap => {
                let closure = self.pop_s()?;
                if !closure.is_closure() {
                    return Err(Error::Type(format!(
                        "cannot apply {}",
                        closure.kind_name()
                    )));
                }
                let arg_list = self.pop_s()?;
                self.save_context();
                self.s = self.rt.nil();
                self.e = Value::cons(&arg_list, &closure.env());
                self.c = closure.body();
            }
            Opcode::Rtn => {
                let result = self.pop_s()?;
                let context = self.pop_d()?;
                self.s = context.try_car()?;
                let rest = context.try_cdr()?;
                self.e = rest.try_car()?;
                let rest = rest.try_cdr()?;
                self.c = rest.try_car()?;
                self.push_s(&result);
            }
            Opcode::Dum => {
                let nil = self.rt.nil();
                self.e = Value::cons(&nil, &self.e);
            }
            Opcode::Rap => {
                // The dummy frame DUM inserted has served its purpose in
                // the environment chain; drop it before the call.
                let dummy = self.e.try_car()?;
                if !dummy.is_nil() {
                    return Err(Error::Type("dummy environment expected".into()));
                }
                self.e = self.e.cdr();
                let closure = self.pop_s()?;
                if !closure.is_closure() {
                    return Err(Error::Type(format!(
                        "cannot apply {}",
                        closure.kind_name()
                    )));
                }
                let arg_list = self.pop_s()?;
                // The closure captured the dummy-headed environment.
                // Patching its car in place closes the cycle that lets the
                // bindings refer to themselves.
                let closure_env = closure.env();
                let head = closure_env.try_car()?;
                if !head.is_nil() {
                    return Err(Error::Type(
                        "dummy environment expected in closure".into(),
                    ));
                }
                closure_env.set_car(&arg_list);
                self.save_context();
                self.s = self.rt.nil();
                self.e = closure_env;
                self.c = closure.body();
            }
            Opcode::Defun => {
                let function = self.pop_s()?;
                self.append_to_global_frame(&function)?;
                let nil = self.rt.nil();
                self.push_s(&nil);
            }
            Opcode::Pop => {
                self.pop_s()?;
            }
            Opcode::Cons => {
                let lhs = self.pop_s()?;
                let rhs = self.pop_s()?;
                let pair = Value::cons(&lhs, &rhs);
                self.push_s(&pair);
            }
            Opcode::Car => {
                let value = self.pop_s()?;
                let car = value.try_car()?;
                self.push_s(&car);
            }
            Opcode::Cdr => {
                let value = self.pop_s()?;
                let cdr = value.try_cdr()?;
                self.push_s(&cdr);
            }
            Opcode::Consp => {
                let value = self.pop_s()?;
                let cdr = value.try_cdr()?;
                let result = if cdr.is_cons() {
                    self.rt.true_value()
                } else {
                    self.rt.nil()
                };
                self.push_s(&result);
            }
            Opcode::Add => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                self.push_integer(lhs.wrapping_add(rhs));
            }
            Opcode::Sub => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                self.push_integer(lhs.wrapping_sub(rhs));
            }
            Opcode::Mul => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                self.push_integer(lhs.wrapping_mul(rhs));
            }
            Opcode::Div => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                if rhs == 0 {
                    return Err(Error::DivisionByZero);
                }
                self.push_integer(lhs.wrapping_div(rhs));
            }
            Opcode::Eq => {
                let lhs = self.pop_s()?;
                let rhs = self.pop_s()?;
                // Integers compare by value, everything else by cell
                // identity. Interning makes identity equal name equality
                // for symbols.
                let equal = if lhs.is_integer() && rhs.is_integer() {
                    lhs.as_integer() == rhs.as_integer()
                } else {
                    lhs == rhs
                };
                self.push_integer(equal as i64);
            }
            Opcode::Lt => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                self.push_integer((lhs < rhs) as i64);
            }
            Opcode::Gt => {
                let (lhs, rhs) = self.pop_integer_pair()?;
                self.push_integer((lhs > rhs) as i64);
            }
            Opcode::Print => {
                // Reads the top of the stack without popping; the printed
                // value stays as the result of the expression.
                let top = self
                    .s
                    .try_car()
                    .map_err(|_| Error::Program("stack underflow".into()))?;
                let text = printer::display(self.rt, &top);
                self.console.print(&text)?;
            }
            Opcode::Read => {
                let input = self.console.read_integer()?;
                let value = self.rt.integer(input);
                self.push_s(&value);
            }
        }
        Ok(())
    }

    /// DEFUN appends the freshly made closure to the end of the global
    /// frame, so its offset matches the one the compiler promised.
    fn append_to_global_frame(&mut self, value: &Value) -> Result<()> {
        let frame = self.e.try_car()?;
        let entry = Value::cons(value, &self.rt.nil());
        if frame.is_nil() {
            self.e.set_car(&entry);
            return Ok(());
        }
        let mut last = frame;
        loop {
            let next = last.try_cdr()?;
            if next.is_nil() {
                break;
            }
            last = next;
        }
        last.set_cdr(&entry);
        Ok(())
    }

    /// Look up a `(depth . offset)` coordinate in the environment chain.
    fn locate(&self, coord: &Value) -> Result<Value> {
        let depth = integer_of(&coord.try_car()?)?;
        let offset = integer_of(&coord.try_cdr()?)?;
        let mut frames = self.e.clone();
        for _ in 0..depth {
            frames = frames.try_cdr()?;
        }
        let mut slot = frames.try_car()?;
        for _ in 0..offset {
            slot = slot.try_cdr()?;
        }
        slot.try_car()
    }

    /// Push the (S, E, C) triple onto the dump before jumping into a
    /// closure body.
    fn save_context(&mut self) {
        let context = self.rt.list(&[self.s.clone(), self.e.clone(), self.c.clone()]);
        self.d = Value::cons(&context, &self.d);
    }

    /// After a runtime error the registers must be usable again: S, C and
    /// D are cleared and E is trimmed back to its final cons, the global
    /// frame, so top-level definitions survive.
    fn recover(&mut self) {
        self.s = self.rt.nil();
        self.c = self.rt.nil();
        self.d = self.rt.nil();
        if !self.e.is_cons() {
            self.e = Value::cons(&self.rt.nil(), &self.rt.nil());
            return;
        }
        loop {
            let next = self.e.cdr();
            if !next.is_cons() {
                break;
            }
            self.e = next;
        }
    }

    fn fetch(&mut self) -> Result<Value> {
        let value = self
            .c
            .try_car()
            .map_err(|_| Error::Program("truncated bytecode".into()))?;
        self.c = self.c.cdr();
        Ok(value)
    }

    fn fetch_opcode(&mut self) -> Result<Opcode> {
        let value = self.fetch()?;
        if !value.is_integer() {
            return Err(Error::Program(format!(
                "opcode expected, got {}",
                value.kind_name()
            )));
        }
        let code = value.as_integer();
        Opcode::from_i64(code).ok_or_else(|| Error::Program(format!("undefined opcode {}", code)))
    }

    fn push_s(&mut self, value: &Value) {
        self.s = Value::cons(value, &self.s);
    }

    fn pop_s(&mut self) -> Result<Value> {
        let value = self
            .s
            .try_car()
            .map_err(|_| Error::Program("stack underflow".into()))?;
        self.s = self.s.cdr();
        Ok(value)
    }

    fn pop_d(&mut self) -> Result<Value> {
        let value = self
            .d
            .try_car()
            .map_err(|_| Error::Program("dump underflow".into()))?;
        self.d = self.d.cdr();
        Ok(value)
    }

    fn pop_integer_pair(&mut self) -> Result<(i64, i64)> {
        let lhs = integer_of(&self.pop_s()?)?;
        let rhs = integer_of(&self.pop_s()?)?;
        Ok((lhs, rhs))
    }

    fn push_integer(&mut self, value: i64) {
        let cell = self.rt.integer(value);
        self.push_s(&cell);
    }
}

fn integer_of(value: &Value) -> Result<i64> {
    if value.is_integer() {
        Ok(value.as_integer())
    } else {
        Err(Error::Type(format!(
            "expected an integer, got {}",
            value.kind_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::compiler::Compiler;
    use crate::reader::Reader;

    /// Console double: scripted inputs, captured output.
    struct ScriptedConsole {
        inputs: Vec<i64>,
        output: Rc<RefCell<String>>,
    }

    impl Console for ScriptedConsole {
        fn read_integer(&mut self) -> Result<i64> {
            if self.inputs.is_empty() {
                return Err(Error::Read("no scripted input left".into()));
            }
            Ok(self.inputs.remove(0))
        }

        fn print(&mut self, text: &str) -> Result<()> {
            self.output.borrow_mut().push_str(text);
            self.output.borrow_mut().push('\n');
            Ok(())
        }
    }

    fn eval_all(rt: &Runtime, compiler: &mut Compiler, vm: &mut Vm, src: &str) -> Result<Value> {
        let mut reader = Reader::new(rt, src);
        let mut result = rt.nil();
        while let Some(form) = reader.read()? {
            let code = compiler.compile(&form)?;
            result = vm.run(&code)?;
        }
        Ok(result)
    }

    fn eval_one(src: &str) -> Result<i64> {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        eval_all(&rt, &mut compiler, &mut vm, src).map(|v| v.as_integer())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_one("(+ 1 2)").unwrap(), 3);
        assert_eq!(eval_one("(- 10 4)").unwrap(), 6);
        assert_eq!(eval_one("(* 6 7)").unwrap(), 42);
        assert_eq!(eval_one("(/ 9 2)").unwrap(), 4);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(matches!(eval_one("(/ 1 0)"), Err(Error::DivisionByZero)));
    }

    #[test]
    fn arithmetic_requires_integers() {
        assert!(matches!(eval_one("(+ nil 1)"), Err(Error::Type(_))));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval_one("(< 1 2)").unwrap(), 1);
        assert_eq!(eval_one("(< 2 1)").unwrap(), 0);
        assert_eq!(eval_one("(> 2 1)").unwrap(), 1);
        assert_eq!(eval_one("(eq 1 1)").unwrap(), 1);
        assert_eq!(eval_one("(eq 1 2)").unwrap(), 0);
    }

    #[test]
    fn eq_on_symbols_is_identity() {
        assert_eq!(eval_one("(eq (quote a) (quote a))").unwrap(), 1);
        assert_eq!(eval_one("(eq (quote a) (quote b))").unwrap(), 0);
    }

    #[test]
    fn conditionals_follow_truthiness() {
        assert_eq!(eval_one("(if t 1 2)").unwrap(), 1);
        assert_eq!(eval_one("(if nil 1 2)").unwrap(), 2);
        assert_eq!(eval_one("(if 0 1 2)").unwrap(), 2);
        assert_eq!(eval_one("(if 7 1 2)").unwrap(), 1);
    }

    #[test]
    fn quote_returns_the_literal() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        let result = eval_all(&rt, &mut compiler, &mut vm, "(quote yes)").unwrap();
        assert_eq!(result, rt.intern("yes"));
    }

    #[test]
    fn cons_car_cdr_laws() {
        assert_eq!(eval_one("(car (cons 1 2))").unwrap(), 1);
        assert_eq!(eval_one("(cdr (cons 1 2))").unwrap(), 2);
        assert_eq!(
            eval_one("(car (cdr (cons 1 (cons 2 (cons 3 nil)))))").unwrap(),
            2
        );
    }

    #[test]
    fn car_of_non_cons_is_a_type_error() {
        assert!(matches!(eval_one("(car 5)"), Err(Error::Type(_))));
    }

    #[test]
    fn consp_tests_the_cdr_of_its_argument() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        // The cdr is a cons: true.
        let longer = eval_all(
            &rt,
            &mut compiler,
            &mut vm,
            "(consp (cons 1 (cons 2 nil)))",
        )
        .unwrap();
        assert_eq!(longer, rt.true_value());
        // The cdr is nil: false, even though the argument is a cons.
        let single = eval_all(&rt, &mut compiler, &mut vm, "(consp (cons 1 nil))").unwrap();
        assert!(single.is_nil());
        // A non-cons argument has no cdr at all.
        assert!(matches!(
            eval_all(&rt, &mut compiler, &mut vm, "(consp 5)"),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn lambda_application() {
        assert_eq!(eval_one("((lambda (x) (* x x)) 7)").unwrap(), 49);
        assert_eq!(eval_one("((lambda (x y) (- x y)) 10 3)").unwrap(), 7);
    }

    #[test]
    fn arguments_arrive_left_to_right() {
        assert_eq!(eval_one("((lambda (a b c) a) 1 2 3)").unwrap(), 1);
        assert_eq!(eval_one("((lambda (a b c) c) 1 2 3)").unwrap(), 3);
    }

    #[test]
    fn closures_capture_their_environment() {
        assert_eq!(eval_one("(((lambda (x) (lambda (y) (+ x y))) 10) 5)").unwrap(), 15);
    }

    #[test]
    fn applying_a_non_closure_is_a_type_error() {
        assert!(matches!(eval_one("(5 1)"), Err(Error::Type(_))));
    }

    #[test]
    fn let_binds_values() {
        assert_eq!(eval_one("(let (x y) (3 4) (+ x y))").unwrap(), 7);
    }

    #[test]
    fn letrec_supports_recursion() {
        let factorial =
            "(letrec (f) ((lambda (n) (if (eq n 0) 1 (* n (f (- n 1)))))) (f 5))";
        assert_eq!(eval_one(factorial).unwrap(), 120);
    }

    #[test]
    fn letrec_supports_mutual_recursion() {
        let even_odd = "(letrec (even odd) \
                         ((lambda (n) (if (eq n 0) 1 (odd (- n 1)))) \
                          (lambda (n) (if (eq n 0) 0 (even (- n 1))))) \
                         (even 10))";
        assert_eq!(eval_one(even_odd).unwrap(), 1);
    }

    #[test]
    fn progn_returns_the_last_value() {
        assert_eq!(eval_one("(progn 1 2 3)").unwrap(), 3);
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        assert!(eval_all(&rt, &mut compiler, &mut vm, "(progn)")
            .unwrap()
            .is_nil());
    }

    #[test]
    fn defun_definitions_persist_across_programs() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        let result = eval_all(
            &rt,
            &mut compiler,
            &mut vm,
            "(progn (defun inc (x) (+ x 1)) (inc 41))",
        )
        .unwrap();
        assert_eq!(result.as_integer(), 42);
        // A separate program still sees the definition.
        let again = eval_all(&rt, &mut compiler, &mut vm, "(inc 1)").unwrap();
        assert_eq!(again.as_integer(), 2);
    }

    #[test]
    fn defun_defined_functions_can_recurse() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        let result = eval_all(
            &rt,
            &mut compiler,
            &mut vm,
            "(progn (defun fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 10))",
        )
        .unwrap();
        assert_eq!(result.as_integer(), 55);
    }

    #[test]
    fn errors_reset_the_machine_but_keep_definitions() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        eval_all(&rt, &mut compiler, &mut vm, "(defun inc (x) (+ x 1))").unwrap();
        // A failing program must not poison the machine.
        assert!(eval_all(&rt, &mut compiler, &mut vm, "(car 5)").is_err());
        let result = eval_all(&rt, &mut compiler, &mut vm, "(inc 4)").unwrap();
        assert_eq!(result.as_integer(), 5);
    }

    #[test]
    fn print_leaves_the_value_on_the_stack() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let output = Rc::new(RefCell::new(String::new()));
        let console = ScriptedConsole {
            inputs: Vec::new(),
            output: Rc::clone(&output),
        };
        let mut vm = Vm::with_console(&rt, Box::new(console));
        let result = eval_all(&rt, &mut compiler, &mut vm, "(+ (print 41) 1)").unwrap();
        assert_eq!(result.as_integer(), 42);
        assert_eq!(output.borrow().as_str(), "41\n");
    }

    #[test]
    fn read_pushes_console_input() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let output = Rc::new(RefCell::new(String::new()));
        let console = ScriptedConsole {
            inputs: vec![7],
            output: Rc::clone(&output),
        };
        let mut vm = Vm::with_console(&rt, Box::new(console));
        let result = eval_all(&rt, &mut compiler, &mut vm, "(+ (read) 1)").unwrap();
        assert_eq!(result.as_integer(), 8);
    }

    #[test]
    fn deep_recursion_exercises_the_collector() {
        let rt = Runtime::new();
        let mut compiler = Compiler::new(&rt);
        let mut vm = Vm::new(&rt);
        let sum = "(letrec (sum) ((lambda (n) (if (eq n 0) 0 (+ n (sum (- n 1)))))) (sum 200))";
        let result = eval_all(&rt, &mut compiler, &mut vm, sum).unwrap();
        assert_eq!(result.as_integer(), 20100);
        // The run must have churned through more cells than one bank
        // holds, collecting along the way.
        assert!(rt.gc_stats().banks >= 1);
    }
}
