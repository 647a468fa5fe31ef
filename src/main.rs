use std::io::{self, IsTerminal, Read};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use secd::{printer, Compiler, Reader, Runtime, Vm};

const HISTORY_FILE: &str = ".secd_history";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut show_code = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--show-code" => show_code = true,
            "--help" | "-h" => {
                println!("Usage: secd [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --show-code    Disassemble each program before running it");
                println!("  --help, -h     Show this help message");
                println!();
                println!("Environment variables:");
                println!("  RUST_LOG=secd=debug    Log collector activity to stderr");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Try 'secd --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    let rt = Runtime::new();
    let mut compiler = Compiler::new(&rt);
    let mut vm = Vm::new(&rt);

    if io::stdin().is_terminal() {
        run_interactive(&rt, &mut compiler, &mut vm, show_code);
    } else {
        run_piped(&rt, &mut compiler, &mut vm, show_code);
    }
}

/// Interactive REPL: accumulate lines until parens are balanced, then
/// compile and run each expression in the buffer.
fn run_interactive(rt: &Runtime, compiler: &mut Compiler, vm: &mut Vm, mut show_code: bool) {
    println!("secd  a tiny Lisp on a SECD machine");
    println!("Type :help for commands, Ctrl+D to quit.\n");

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to initialize line editor: {}", e);
            std::process::exit(1);
        }
    };
    let _ = rl.load_history(HISTORY_FILE);

    let mut buffer = String::new();
    let mut depth: i32 = 0;

    loop {
        let prompt = if buffer.is_empty() { "secd> " } else { "   .. " };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if buffer.is_empty() {
                    match trimmed {
                        ":help" => {
                            println!(":stats  print collector statistics");
                            println!(":gc     run a collection cycle");
                            println!(":code   toggle disassembly of compiled programs");
                            continue;
                        }
                        ":stats" => {
                            print_stats(rt);
                            continue;
                        }
                        ":gc" => {
                            rt.gc_collect();
                            print_stats(rt);
                            continue;
                        }
                        ":code" => {
                            show_code = !show_code;
                            println!(
                                "disassembly {}",
                                if show_code { "on" } else { "off" }
                            );
                            continue;
                        }
                        "" => continue,
                        _ => {}
                    }
                }

                // Track paren depth so multi-line forms can be entered.
                for ch in line.chars() {
                    match ch {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                }
                buffer.push_str(&line);
                buffer.push('\n');

                if depth <= 0 {
                    depth = 0;
                    let input = std::mem::take(&mut buffer);
                    let _ = rl.add_history_entry(input.trim());
                    eval_and_print(rt, compiler, vm, &input, show_code);
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                depth = 0;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
}

/// Piped mode: read everything, then evaluate one expression at a time.
fn run_piped(rt: &Runtime, compiler: &mut Compiler, vm: &mut Vm, show_code: bool) {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("Failed to read input: {}", e);
        std::process::exit(1);
    }
    eval_and_print(rt, compiler, vm, &input, show_code);
}

/// Evaluate every expression in `input`, printing each result.
fn eval_and_print(rt: &Runtime, compiler: &mut Compiler, vm: &mut Vm, input: &str, show_code: bool) {
    let mut reader = Reader::new(rt, input);
    loop {
        match reader.read() {
            Ok(Some(form)) => {
                let code = match compiler.compile(&form) {
                    Ok(code) => code,
                    Err(e) => {
                        eprintln!("compile error: {}", e);
                        continue;
                    }
                };
                if show_code {
                    print!("{}", printer::print_code(rt, &code));
                }
                match vm.run(&code) {
                    Ok(value) => println!("{}", printer::display(rt, &value)),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("read error: {}", e);
                break;
            }
        }
    }
}

fn print_stats(rt: &Runtime) {
    let stats = rt.gc_stats();
    println!("allocations:  {}", stats.allocations);
    println!("live objects: {}", stats.live_objects);
    println!("active banks: {}", stats.banks);
    println!("root changes: {}", stats.root_changes);
}
