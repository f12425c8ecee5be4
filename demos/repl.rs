use cyberscheme::{Host, Status, Value, Vm, VmConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr; RUST_LOG=cyberscheme=debug shows the VM's lifecycle
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("CyberScheme");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut vm = Vm::new(Host::stdout(), VmConfig::default());

    loop {
        match rl.readline("scheme> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&vm);
                        continue;
                    }
                    ":resume" => {
                        vm.resume();
                    }
                    ":break" => {
                        let paused = vm.toggle_break();
                        println!("break flag {}", if paused { "set" } else { "cleared" });
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    source => {
                        vm.submit(source);
                    }
                }

                drive(&mut vm);
                println!();
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Act as the scheduler: a lone VM has no peers to wait for, so every
/// suspension is released right away. Budget exhaustion is left to `:resume`.
fn drive(vm: &mut Vm) {
    loop {
        match vm.status().clone() {
            Status::Suspended => {
                vm.resume();
            }
            Status::AwaitingSync(token) => {
                vm.resume_sync(token);
            }
            Status::Paused => {
                println!("(paused; :break to continue)");
                return;
            }
            Status::Exhausted => {
                println!("(:resume to continue)");
                return;
            }
            Status::Idle | Status::Halted(_) | Status::Errored(_) => return,
        }
    }
}

fn print_help() {
    println!("CyberScheme REPL:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show global bindings");
    println!("  :resume    - Run another slice of a program that used up its step budget");
    println!("  :break     - Toggle the pause flag");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (fact 20)");
    println!("  (call/cc (lambda (k) (+ 1 (k 42))))");
    println!("  (begin (display \"tick\") (yield) (display \"tock\"))");
    println!();
}

fn print_environment(vm: &Vm) {
    let bindings = vm.globals();

    println!("Global bindings ({} total):", bindings.len());
    println!();

    let (builtins, user_defined): (Vec<_>, Vec<_>) = bindings
        .into_iter()
        .partition(|(_, value)| matches!(value, Value::Primitive(_)));

    if !builtins.is_empty() {
        println!("Primitives ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for (name, _) in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
