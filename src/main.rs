use std::{env, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;

use emuctl::{
    config::errors::ERR_CLI_USAGE, init_tracing, EmulatorSnapshot, HttpEmulatorService, Outcome,
    RunOutcome, SessionConfig, SessionStore, TaskId, TaskPicker, Variant, API_ENDPOINT,
};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("emuctl: {err:?}");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Err(anyhow!("{ERR_CLI_USAGE}: missing command"));
    }
    let cmd = args.remove(0);
    if matches!(cmd.as_str(), "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let service = HttpEmulatorService::new(&API_ENDPOINT)
        .context("failed to construct the emulator service client")?;
    let store = SessionStore::new(Arc::new(service), SessionConfig::from_env());
    let result = dispatch(&store, &cmd, &args).await;
    store.close();
    result
}

async fn dispatch(store: &SessionStore, cmd: &str, args: &[String]) -> Result<()> {
    match cmd {
        "state" => {
            expect_no_args(cmd, args)?;
            settle(store, store.load_state().await)?;
            print_snapshot(&store.snapshot());
        }
        "tasks" => {
            expect_no_args(cmd, args)?;
            settle(store, store.load_tasks().await)?;
            for task in store.tasks() {
                println!("{:>3}  {}", task.id, task.title);
                if !task.description.is_empty() {
                    println!("     {}", task.description);
                }
            }
        }
        "compile" => {
            let opts = Options::parse(cmd, args)?;
            let path = opts
                .file
                .context(format!("{ERR_CLI_USAGE}: compile expects a source file"))?;
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            select_task(store, opts.task).await;
            settle(store, store.compile(source).await)?;
            let snap = store.snapshot();
            for (addr, word) in snap.machine_code.iter().enumerate() {
                println!("{addr:04X}  {word}");
            }
        }
        "load-task" => {
            let task = parse_task(args.first(), cmd)?;
            settle(store, store.load_task(task).await)?;
            print_snapshot(&store.snapshot());
        }
        "execute" => {
            let opts = Options::parse(cmd, args)?;
            if let Some(path) = &opts.file {
                let source = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                store.set_source_code(source);
            }
            settle(store, store.execute(opts.task).await)?;
            print_snapshot(&store.snapshot());
        }
        "step" => {
            let opts = Options::parse(cmd, args)?;
            select_task(store, opts.task).await;
            let outcome = store.step().await;
            settle(store, outcome)?;
            if outcome == Outcome::Primed {
                println!("task data loaded; step again to execute");
            }
            print_snapshot(&store.snapshot());
        }
        "run" => {
            let opts = Options::parse(cmd, args)?;
            select_task(store, opts.task).await;
            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!(target = "emuctl", "interrupt received; stopping run");
                    let _ = cancel_tx.send(true);
                }
            });
            let outcome = store.run_remaining_until(cancel_rx).await;
            print_snapshot(&store.snapshot());
            report_run(outcome);
            if outcome.is_failure() {
                return Err(status_error(store));
            }
        }
        "reset" => {
            expect_no_args(cmd, args)?;
            settle(store, store.reset().await)?;
            print_snapshot(&store.snapshot());
        }
        "example" => {
            let task = parse_task(args.first(), cmd)?;
            let mut picker = TaskPicker::new(store.clone());
            picker.select_task(task).await;
            if let Some(raw) = args.get(1) {
                let variant: Variant = raw
                    .parse()
                    .with_context(|| format!("{ERR_CLI_USAGE}: bad variant"))?;
                picker.select_variant(variant).await?;
            } else if emuctl::tasks::has_variants(task) {
                picker.select_variant(Variant::Example).await?;
            }
            if picker.example_text().is_empty() {
                return Err(anyhow!("no program text available for task {task}"));
            }
            println!("{}", picker.example_text());
        }
        other => return Err(anyhow!("{ERR_CLI_USAGE}: unknown command '{other}'")),
    }
    Ok(())
}

/// Flags shared by compile/execute/step/run.
#[derive(Debug, Default)]
struct Options {
    task: Option<TaskId>,
    file: Option<PathBuf>,
}

impl Options {
    fn parse(cmd: &str, args: &[String]) -> Result<Self> {
        let mut opts = Options::default();
        let mut idx = 0usize;
        while idx < args.len() {
            match args[idx].as_str() {
                "--task" => {
                    idx += 1;
                    opts.task = Some(parse_task(args.get(idx), cmd)?);
                }
                flag if flag.starts_with("--") => {
                    return Err(anyhow!(
                        "{ERR_CLI_USAGE}: unexpected flag '{flag}' for {cmd} command"
                    ));
                }
                path => {
                    if opts.file.is_some() {
                        return Err(anyhow!("{ERR_CLI_USAGE}: {cmd} takes one source file"));
                    }
                    opts.file = Some(PathBuf::from(path));
                }
            }
            idx += 1;
        }
        Ok(opts)
    }
}

fn parse_task(raw: Option<&String>, cmd: &str) -> Result<TaskId> {
    let raw = raw.with_context(|| format!("{ERR_CLI_USAGE}: {cmd} expects a task id"))?;
    let id: u32 = raw
        .parse()
        .with_context(|| format!("{ERR_CLI_USAGE}: '{raw}' is not a task id"))?;
    let task = TaskId(id);
    if !task.is_valid() {
        return Err(anyhow!("{ERR_CLI_USAGE}: task ids start at 1"));
    }
    Ok(task)
}

fn expect_no_args(cmd: &str, args: &[String]) -> Result<()> {
    match args.first() {
        Some(extra) => Err(anyhow!(
            "{ERR_CLI_USAGE}: unexpected argument '{extra}' for {cmd} command"
        )),
        None => Ok(()),
    }
}

async fn select_task(store: &SessionStore, task: Option<TaskId>) {
    if task.is_some() {
        store.set_current_task(task).await;
    }
}

fn settle(store: &SessionStore, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Failed => Err(status_error(store)),
        _ => Ok(()),
    }
}

fn status_error(store: &SessionStore) -> anyhow::Error {
    match store.status().error {
        Some(message) => anyhow!(message),
        None => anyhow!("operation failed"),
    }
}

fn report_run(outcome: RunOutcome) {
    let steps = outcome.steps();
    match outcome {
        RunOutcome::Primed => println!("task data loaded; run again to execute"),
        RunOutcome::Halted { .. } => println!("halted after {steps} steps"),
        RunOutcome::Exhausted { .. } => println!("no more instructions after {steps} steps"),
        RunOutcome::BudgetReached { .. } => println!("step budget reached ({steps} steps)"),
        RunOutcome::Failed { .. } => println!("stopped by an error after {steps} steps"),
        RunOutcome::Cancelled { .. } => println!("interrupted after {steps} steps"),
        RunOutcome::Superseded { .. } => println!("overtaken by another step after {steps} steps"),
    }
}

fn print_snapshot(snap: &EmulatorSnapshot) {
    let p = &snap.processor;
    println!(
        "pc={:#06X} ir={:#06X} {:<16} cycles={} halted={}",
        p.program_counter, p.instruction_register, p.instruction_register_asm, p.cycles, p.is_halted
    );
    let regs: Vec<String> = p
        .registers
        .iter()
        .enumerate()
        .map(|(i, r)| format!("R{i}={r}"))
        .collect();
    println!("{}", regs.join(" "));
    println!(
        "flags: Z={} C={} V={} N={}",
        u8::from(p.flags.zero),
        u8::from(p.flags.carry),
        u8::from(p.flags.overflow),
        u8::from(p.flags.negative)
    );
    match snap.current_task {
        Some(task) => println!("task: {task}  ram words: {}", snap.memory.ram.len()),
        None => println!("task: none  ram words: {}", snap.memory.ram.len()),
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  emuctl state");
    eprintln!("  emuctl tasks");
    eprintln!("  emuctl compile <file.asm> [--task N]");
    eprintln!("  emuctl load-task N");
    eprintln!("  emuctl execute [file.asm] [--task N]");
    eprintln!("  emuctl step [--task N]");
    eprintln!("  emuctl run [--task N]");
    eprintln!("  emuctl reset");
    eprintln!("  emuctl example N [example|template]");
    eprintln!();
    eprintln!("Environment: EMUCTL_API_URL, EMUCTL_PAGE_HOST, EMUCTL_MAX_STEPS,");
    eprintln!("  EMUCTL_STEP_DELAY_MS, EMUCTL_COMPILE_BANNER_MS, EMUCTL_HTTP_TIMEOUT_MS, RUST_LOG");
}
