use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lilt", about = "Compiler for the lilt language, targeting WebAssembly")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a .lilt file and dump the AST
    Parse {
        /// Path to the .lilt source file
        file: PathBuf,
    },
    /// Type-check a .lilt file and print the inferred type
    Check {
        /// Path to the .lilt source file
        file: PathBuf,
    },
    /// Compile a .lilt file to a .wasm module
    Build {
        /// Path to the .lilt source file
        file: PathBuf,
        /// Output path (defaults to the source file stem plus .wasm)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile a .lilt file and run its entry, printing the result
    Run {
        /// Path to the .lilt source file
        file: PathBuf,
    },
}

fn read_file(file: &Path) -> String {
    match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => fail(file, "io", e),
    }
}

fn fail(file: &Path, stage: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {} error: {}", file.display(), stage, error);
    std::process::exit(1);
}

fn parse_file(file: &Path) -> lilt_ast::Program {
    let source = read_file(file);
    match lilt_parser::parse(&source) {
        Ok(program) => program,
        Err(e) => fail(file, "parse", e),
    }
}

/// Run the whole pipeline and produce the `.wasm` bytes.
fn build_bytes(file: &Path) -> Vec<u8> {
    let program = parse_file(file);
    if let Err(e) = lilt_typeck::check(&program) {
        fail(file, "type", e);
    }
    let lowered = match lilt_ir::lower(&program) {
        Ok(lowered) => lowered,
        Err(e) => fail(file, "lowering", e),
    };
    match lilt_wasm::compile_program(&lowered) {
        Ok(bytes) => bytes,
        Err(e) => fail(file, "codegen", e),
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Parse { file } => {
            let program = parse_file(&file);
            print!("{}", lilt_ast::pretty_print(&program));
        }

        Command::Check { file } => {
            let program = parse_file(&file);
            match lilt_typeck::check(&program) {
                Ok(scheme) => println!("{}", scheme),
                Err(e) => fail(&file, "type", e),
            }
        }

        Command::Build { file, output } => {
            let wasm_bytes = build_bytes(&file);
            let output = output.unwrap_or_else(|| file.with_extension("wasm"));
            if let Err(e) = std::fs::write(&output, &wasm_bytes) {
                fail(&output, "io", e);
            }
            println!("wrote {}", output.display());
        }

        Command::Run { file } => {
            let wasm_bytes = build_bytes(&file);
            let engine = wasmtime::Engine::default();
            let module = match wasmtime::Module::new(&engine, &wasm_bytes) {
                Ok(module) => module,
                Err(e) => fail(&file, "wasm", e),
            };
            let mut store = wasmtime::Store::new(&engine, ());
            let instance = match wasmtime::Instance::new(&mut store, &module, &[]) {
                Ok(instance) => instance,
                Err(e) => fail(&file, "wasm", e),
            };
            let entry = match instance.get_typed_func::<(), i32>(&mut store, "main$inner") {
                Ok(entry) => entry,
                Err(e) => fail(&file, "wasm", e),
            };
            match entry.call(&mut store, ()) {
                Ok(result) => println!("{}", result),
                Err(e) => fail(&file, "runtime", e),
            }
        }
    }
}
