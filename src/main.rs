use prime_coro::{
    compile_source,
    diagnostics::{
        emit_lowering_errors, emit_syntax_errors, report_io_error, report_runtime_error,
    },
    language::compiler::LowerOptions,
    logging::{init_logging, LogOptions},
    runtime::{Event, FrameStorage, Interpreter, RunOptions},
    CompileFailure,
};
use std::{env, fs, path::PathBuf, process};

const USAGE: &str =
    "Usage: prime-coro [emit|run] <file.coro> [--elide] [--step-limit <n>] [--no-verify]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Emit,
    Run,
}

struct Cli {
    mode: Mode,
    path: PathBuf,
    lower: LowerOptions,
    run: RunOptions,
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let (command, rest) = args.split_first().ok_or_else(|| USAGE.to_string())?;
    let mode = match command.as_str() {
        "emit" => Mode::Emit,
        "run" => Mode::Run,
        other => return Err(format!("Unknown command `{other}`\n{USAGE}")),
    };

    let mut run = RunOptions::default();
    if env::var("PRIME_CORO_ELIDE").is_ok_and(|value| value == "1") {
        run.storage = FrameStorage::Elided;
    }
    if let Ok(limit) = env::var("PRIME_CORO_STEP_LIMIT") {
        run.step_limit = parse_limit(&limit)?;
    }
    let mut lower = LowerOptions::default();
    let mut path = None;

    let mut rest = rest.iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--elide" => run.storage = FrameStorage::Elided,
            "--no-verify" => lower.verify = false,
            "--step-limit" => {
                let value = rest
                    .next()
                    .ok_or_else(|| "`--step-limit` needs a value".to_string())?;
                run.step_limit = parse_limit(value)?;
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown flag `{flag}`")),
            file => {
                if path.replace(PathBuf::from(file)).is_some() {
                    return Err(USAGE.to_string());
                }
            }
        }
    }

    let path = path.ok_or_else(|| USAGE.to_string())?;
    if path.extension().and_then(|ext| ext.to_str()) != Some("coro") {
        return Err("Invalid file extension. Only .coro files are allowed.".to_string());
    }
    Ok(Cli {
        mode,
        path,
        lower,
        run,
    })
}

fn parse_limit(value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid step limit `{value}`"))
}

fn main() {
    init_logging(&LogOptions::from_env());

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    };

    let source = match fs::read_to_string(&cli.path) {
        Ok(source) => source,
        Err(err) => {
            report_io_error(&cli.path, &err);
            process::exit(1);
        }
    };

    let module = match compile_source(&source, cli.lower.clone()) {
        Ok(module) => module,
        Err(CompileFailure::Syntax(errors)) => {
            emit_syntax_errors(&cli.path, &source, &errors);
            process::exit(1);
        }
        Err(CompileFailure::Lowering(errors)) => {
            emit_lowering_errors(&cli.path, &source, &errors);
            process::exit(1);
        }
    };

    match cli.mode {
        Mode::Emit => print!("{module}"),
        Mode::Run => {
            let mut interpreter = Interpreter::new(module, cli.run);
            let result = interpreter.run_main();
            let events = interpreter.take_events();
            for event in &events {
                if let Event::Trace { value } = event {
                    println!("trace {value}");
                }
            }
            match result {
                Ok(value) => {
                    println!("result: {value}");
                    println!("{}", summarize(&events));
                }
                Err(err) => {
                    report_runtime_error(&err);
                    process::exit(1);
                }
            }
        }
    }
}

fn summarize(events: &[Event]) -> String {
    let mut suspends = 0;
    let mut resumes = 0;
    let mut destroys = 0;
    let mut allocs = 0;
    let mut frees = 0;
    let mut teardowns = 0;
    for event in events {
        match event {
            Event::Suspend { .. } => suspends += 1,
            Event::Resume { .. } => resumes += 1,
            Event::Destroy { .. } => destroys += 1,
            Event::Alloc { .. } => allocs += 1,
            Event::Free { object: Some(_) } => frees += 1,
            Event::Teardown { .. } => teardowns += 1,
            _ => {}
        }
    }
    format!(
        "events: {suspends} suspends, {resumes} resumes, {destroys} destroys, \
         {allocs} allocs, {frees} frees, {teardowns} teardowns"
    )
}
