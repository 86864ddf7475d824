mod call_frame;
mod chunk;
mod compiler;
mod debug;
mod gc;
mod memory;
mod objects;
mod scanner;
mod std_mod;
mod table;
mod value;
mod vm;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use crate::vm::{InterpretResult, VM};

#[derive(Parser)]
#[command(name = "ember")]
#[command(version)]
#[command(about = "Ember: a small scripting language on a bytecode VM", long_about = None)]
struct Cli {
    /// Script to run; starts a REPL when omitted
    script: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }
            let _ = err.print();
            process::exit(64);
        }
    };

    match cli.script {
        Some(path) => run_file(&path),
        None => repl(),
    }
}

fn repl() {
    let mut vm = VM::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                // Each line is its own script; errors leave the session
                // alive and globals persist.
                vm.interpret(&line);
            }
            Err(err) => {
                eprintln!("Could not read from stdin: {}.", err);
                process::exit(74);
            }
        }
    }
}

fn run_file(path: &Path) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read \"{}\": {}.", path.display(), err);
            process::exit(74);
        }
    };

    let mut vm = VM::new();
    match vm.interpret(&source) {
        InterpretResult::InterpretOk => {}
        InterpretResult::InterpretCompileErr => process::exit(65),
        InterpretResult::InterpretRuntimeErr => process::exit(70),
    }
}
