use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use jqexec_utils::init_logging;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::SweepPolicy;
use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::executor::{EvalOptions, Executor};
use crate::template;
use crate::version::VERSION;

#[derive(Parser, Debug)]
#[command(name = "jqexec", version = VERSION, about = "Evaluate jq-style filters over JSON")]
pub struct JqexecCli {
    #[arg(long, global = true)]
    /// Number of worker threads for asynchronous evaluation.
    workers: Option<usize>,

    #[arg(long, global = true)]
    /// Maximum number of compiled filters kept in the cache.
    cache_capacity: Option<usize>,

    #[arg(long, global = true)]
    /// How eviction treats filters that are in use: stop-at-busy or skip-busy.
    sweep_policy: Option<SweepPolicy>,

    #[cfg(feature = "toml-config")]
    #[arg(long, global = true)]
    /// Read executor settings from a TOML file before applying the environment.
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    /// Print cache and worker statistics when done.
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

impl JqexecCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct EvalArgs {
    #[arg(long)]
    /// Abort an evaluation after this many seconds.
    pub timeout: Option<f64>,

    #[arg(long)]
    /// Expose the process environment as `$ENV` and `env`.
    pub enable_env: bool,
}

impl EvalArgs {
    fn options(&self) -> Result<EvalOptions> {
        let timeout = match self.timeout {
            Some(secs) if !secs.is_finite() || secs <= 0.0 => {
                bail!("--timeout must be a positive number of seconds, got {secs}")
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };
        Ok(EvalOptions {
            timeout,
            enable_env: self.enable_env,
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluates a filter against JSON read from FILE (or stdin) and prints the first output.
    Eval {
        filter: String,
        file: Option<PathBuf>,
        #[arg(long = "async")]
        /// Run the evaluation on the worker pool.
        on_pool: bool,
        #[arg(long)]
        /// Print string results without JSON quoting.
        raw: bool,
        #[command(flatten)]
        eval: EvalArgs,
    },
    /// Renders a JSON template whose strings may contain `{{ filter }}` expressions.
    Render {
        template: PathBuf,
        file: Option<PathBuf>,
        #[command(flatten)]
        eval: EvalArgs,
    },
    /// Evaluates one filter against every line of a newline-delimited JSON file in parallel.
    Batch {
        filter: String,
        file: PathBuf,
        #[command(flatten)]
        eval: EvalArgs,
    },
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = JqexecCli::parse();
    let executor = Executor::new(executor_config(&cli)?).context("failed to start executor")?;

    match &cli.command {
        Command::Eval {
            filter,
            file,
            on_pool,
            raw,
            eval,
        } => handle_eval(&executor, filter, file.as_deref(), (*on_pool, *raw), eval)?,
        Command::Render {
            template,
            file,
            eval,
        } => handle_render(&executor, template, file.as_deref(), eval)?,
        Command::Batch { filter, file, eval } => handle_batch(&executor, filter, file, eval)?,
    }

    if cli.stats {
        print_stats(&executor);
    }
    Ok(())
}

fn executor_config(cli: &JqexecCli) -> Result<ExecutorConfig> {
    #[cfg(feature = "toml-config")]
    let base = match &cli.config {
        Some(path) => ExecutorConfig::load(path)?,
        None => ExecutorConfig::default(),
    };
    #[cfg(not(feature = "toml-config"))]
    let base = ExecutorConfig::default();

    let mut config = base.with_env(|key| std::env::var(key).ok())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(capacity) = cli.cache_capacity {
        config.cache_capacity = capacity;
    }
    if let Some(policy) = cli.sweep_policy {
        config.sweep_policy = policy;
    }
    config.validate()?;
    debug!(?config, "resolved executor config");
    Ok(config)
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn print_value(value: &Value, raw: bool) -> Result<()> {
    match value {
        Value::String(text) if raw => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

fn handle_eval(
    executor: &Executor,
    filter: &str,
    input: Option<&Path>,
    (on_pool, raw): (bool, bool),
    args: &EvalArgs,
) -> Result<()> {
    let json = read_input(input)?;
    let options = args.options()?;
    let evaluation = if on_pool {
        executor.evaluate_async_with(json, filter, &options).wait()
    } else {
        executor.evaluate_sync_with(&json, filter, &options)
    };

    match evaluation.map_err(report)?.value {
        Some(value) => print_value(&value, raw),
        None => {
            info!(filter, "filter produced no output");
            Ok(())
        }
    }
}

fn handle_render(
    executor: &Executor,
    template_path: &Path,
    input: Option<&Path>,
    args: &EvalArgs,
) -> Result<()> {
    let text = fs::read_to_string(template_path)
        .with_context(|| format!("failed to read template {}", template_path.display()))?;
    let template: Value = serde_json::from_str(&text)
        .with_context(|| format!("template {} is not valid JSON", template_path.display()))?;
    let input: Value =
        serde_json::from_str(&read_input(input)?).context("input is not valid JSON")?;

    let rendered = template::render_recursively(executor, &input, &template, &args.options()?)?;
    print_value(&rendered, false)
}

fn handle_batch(executor: &Executor, filter: &str, file: &Path, args: &EvalArgs) -> Result<()> {
    let options = args.options()?;
    let text =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| (index + 1, line))
        .collect();

    let results: Vec<(usize, Result<Option<Value>, ExecError>)> = lines
        .par_iter()
        .map(|&(line, json)| {
            let outcome = executor
                .evaluate_sync_with(json, filter, &options)
                .map(|evaluation| evaluation.value);
            (line, outcome)
        })
        .collect();

    // A filter that does not compile fails every line the same way.
    if let Some((_, Err(error @ ExecError::Compile { .. }))) = results.first() {
        return Err(report(error.clone()));
    }

    let mut failures = 0usize;
    for (line, outcome) in results {
        match outcome {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => debug!(line, "no output"),
            Err(error) => {
                failures += 1;
                eprintln!("{} line {line}: {error}", "error".red().bold());
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} inputs failed", lines.len());
    }
    Ok(())
}

/// Print the compile diagnostic if there is one and turn the error into a report.
fn report(error: ExecError) -> anyhow::Error {
    if let Some(diagnostic) = error.diagnostic() {
        eprint!("{diagnostic}");
        return anyhow::Error::new(error).context("filter failed to compile");
    }
    anyhow::Error::new(error)
}

fn print_stats(executor: &Executor) {
    let cache = executor.cache_stats();
    let tasks = executor.task_metrics();
    let coordinator = executor.coordinator_stats();

    println!("{}", "[Cache]".bold());
    println!("{:>16}: {}/{}", "Entries", cache.entries, cache.capacity);
    println!("{:>16}: {}", "Hits", cache.hits.to_string().green());
    println!("{:>16}: {}", "Misses", cache.misses.to_string().yellow());
    println!("{:>16}: {}", "Evictions", cache.evictions);
    println!(
        "{:>16}: {:>6.2} ms",
        "Compile time",
        cache.compile_time.as_secs_f64() * 1000.0
    );
    println!("{}", "[Workers]".bold());
    println!("{:>16}: {}", "Spawned", tasks.tasks_spawned);
    println!("{:>16}: {}", "Completed", tasks.tasks_completed);
    println!("{:>16}: {}", "Panicked", tasks.tasks_panicked);
    println!("{:>16}: {}", "Lock waits", coordinator.contended);
}
