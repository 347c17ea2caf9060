use clap::Parser as ClapParser;
use std::{fs, io, process};

use compiler::{Compiler, CompilerSettings, TypeTable};
use heap::{Heap, HeapCreateInfo};
use vm::{ContextState, NativeRegistry, Vm, VmSettings};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program to run, as a JSON syntax tree
    #[arg(help = "The .json program to execute")]
    file: String,

    /// Print bytecode and constants instead of executing
    #[arg(long, help = "Dump bytecode + constant pool")]
    dump_bytecode: bool,

    #[arg(long, help = "Log each callable's disassembly as it is compiled")]
    log_disassembly: bool,

    #[arg(long, help = "Maximum call depth")]
    max_frames: Option<usize>,

    #[arg(long, help = "Maximum operand stack size per frame")]
    max_stack: Option<usize>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.file) {
        Ok(content) => content,
        Err(err) => {
            eprintln!("Error reading file '{}': {}", cli.file, err);
            process::exit(1);
        }
    };
    let program: syntax::Program = match serde_json::from_str(&source) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("Error parsing {}: {}", cli.file, err);
            process::exit(1);
        }
    };

    let natives = NativeRegistry::with_builtins(io::stdout());
    let signatures = natives.signatures();
    let settings = CompilerSettings {
        log_disassembly: cli.log_disassembly,
    };
    let file = match Compiler::with_types(TypeTable::new(), &signatures, settings).compile(&program) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Error compiling {}: {}", cli.file, err);
            process::exit(1);
        }
    };

    if cli.dump_bytecode {
        println!("== {} ==", cli.file);
        print!("{}", file.disassemble());
        return;
    }

    let mut settings = VmSettings::default();
    cli.max_frames.inspect(|&val| settings.max_frames = val);
    cli.max_stack.inspect(|&val| settings.max_operand_stack = val);

    let mut vm = Vm::new(&file, natives, Heap::new(HeapCreateInfo::default()), settings);
    let id = vm.spawn_top_level();
    match vm.execute(id) {
        Ok(ContextState::HaltedNormal) => {}
        Ok(_) => {
            let fault = vm.context(id).and_then(|context| context.exception());
            match fault {
                Some(fault) => eprintln!("Error executing {}: {}", cli.file, fault),
                None => eprintln!("Error executing {}", cli.file),
            }
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Error executing {}: {}", cli.file, err);
            process::exit(1);
        }
    }
}
