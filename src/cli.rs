use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{debug, info};
use weave_cache::{CacheProvider, MemoryCache, ProviderRegistry, RuntimeCache};

use crate::config::WeaveConfig;
use crate::module::{DecodeError, ModuleDef, ModuleFormat, decode_module, encode_module};
use crate::runtime::{Interpreter, Value};
use crate::utils::errors::emit_diagnostics;
use crate::utils::logger;
use crate::utils::profiler::{PhaseTiming, Profiler};
use crate::version::VERSION;
use crate::weaver::{KeyStrategy, MemberOutcome, WeaveError, WeaveReport, Weaver};

#[derive(Parser, Debug)]
#[command(name = "cacheweave", version = VERSION, about = "Build-time cache weaving for compiled modules")]
pub struct CacheWeaveCli {
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    /// Raise log verbosity (-v info, -vv debug).
    verbose: u8,

    #[arg(long, global = true)]
    /// Display phase timing information.
    time: bool,

    #[arg(long, global = true)]
    /// Configuration file to use instead of `cacheweave.toml`.
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    /// Override the configured cache key strategy.
    key_strategy: Option<KeyStrategyArg>,

    #[arg(long, global = true)]
    /// Inject debug trace calls into woven members.
    trace_keys: bool,

    #[arg(long, global = true)]
    /// Fail when weaving produces any warning.
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

impl CacheWeaveCli {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Weaves cache lookups into every marked member and writes the result.
    Weave {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Reports what would be woven without writing anything.
    Check { input: PathBuf },
    /// Prints the module in text form.
    Dump { input: PathBuf },
    /// Executes a method with the interpreter.
    Run {
        input: PathBuf,
        /// Method to call, written `Type::method`.
        method: String,
        args: Vec<String>,
        #[arg(long)]
        /// Weave the module before running it.
        weave: bool,
        #[arg(long, value_enum, default_value_t = ProviderArg::Runtime)]
        provider: ProviderArg,
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Cwil,
    Yaml,
    Json,
}

impl From<FormatArg> for ModuleFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Cwil => ModuleFormat::Cwil,
            FormatArg::Yaml => ModuleFormat::Yaml,
            FormatArg::Json => ModuleFormat::Json,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategyArg {
    Compatible,
    Signature,
}

impl From<KeyStrategyArg> for KeyStrategy {
    fn from(strategy: KeyStrategyArg) -> Self {
        match strategy {
            KeyStrategyArg::Compatible => KeyStrategy::Compatible,
            KeyStrategyArg::Signature => KeyStrategy::Signature,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderArg {
    /// Unbounded in-process map.
    Runtime,
    /// Expiring in-process cache honouring `Duration` and `Eviction`.
    Memory,
}

impl ProviderArg {
    fn build(self) -> Arc<dyn CacheProvider> {
        match self {
            ProviderArg::Runtime => Arc::new(RuntimeCache::new()),
            ProviderArg::Memory => Arc::new(MemoryCache::new()),
        }
    }
}

pub fn run() -> Result<()> {
    let cli = CacheWeaveCli::parse();
    logger::init_logging(cli.verbose);
    let config = weave_config(&cli)?;
    match &cli.command {
        Command::Weave {
            input,
            output,
            format,
        } => handle_weave(&cli, &config, input, output.clone(), *format),
        Command::Check { input } => handle_check(&cli, &config, input),
        Command::Dump { input } => handle_dump(&cli, input),
        Command::Run {
            input,
            method,
            args,
            weave,
            provider,
            repeat,
        } => {
            let request = RunRequest {
                method,
                args,
                weave: *weave,
                provider: *provider,
                repeat: *repeat,
            };
            handle_run(&cli, &config, input, &request)
        }
    }
}

/// File configuration with command-line overrides applied.
fn weave_config(cli: &CacheWeaveCli) -> Result<WeaveConfig> {
    let mut config = WeaveConfig::discover(cli.config.as_deref())?;
    if let Some(strategy) = cli.key_strategy {
        config.key_strategy = strategy.into();
    }
    config.trace_keys |= cli.trace_keys;
    config.fail_on_warnings |= cli.strict;
    debug!(?config, "configuration resolved");
    Ok(config)
}

fn handle_weave(
    cli: &CacheWeaveCli,
    config: &WeaveConfig,
    input: &Path,
    output: Option<PathBuf>,
    format: Option<FormatArg>,
) -> Result<()> {
    let mut profiler = Profiler::new();
    let loaded = load_module(&mut profiler, input)?;
    let mut module = loaded.module;
    let report = weave_module(&mut profiler, config, input, &loaded.source, &mut module)?;
    print_report(&report);

    let format = format.map_or_else(|| ModuleFormat::from_path(input), ModuleFormat::from);
    let output = resolve_output_path(input, output, format);
    let encoded = profiler.record_phase("Writing", || encode_module(&module, format))?;
    fs::write(&output, encoded).with_context(|| format!("failed to write {}", output.display()))?;
    info!(output = %output.display(), "module written");
    println!("{} {}", "wrote".green().bold(), output.display());

    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

fn handle_check(cli: &CacheWeaveCli, config: &WeaveConfig, input: &Path) -> Result<()> {
    let mut profiler = Profiler::new();
    let loaded = load_module(&mut profiler, input)?;
    let mut copy = loaded.module.clone();
    let report = weave_module(&mut profiler, config, input, &loaded.source, &mut copy)?;
    print_report(&report);
    println!(
        "{} {} woven, {} skipped",
        "check".green().bold(),
        report.woven_count(),
        report.skipped_count()
    );
    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

fn handle_dump(cli: &CacheWeaveCli, input: &Path) -> Result<()> {
    let mut profiler = Profiler::new();
    let loaded = load_module(&mut profiler, input)?;
    let text = profiler.record_phase("Printing", || encode_module(&loaded.module, ModuleFormat::Cwil))?;
    print!("{text}");
    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

struct RunRequest<'a> {
    method: &'a str,
    args: &'a [String],
    weave: bool,
    provider: ProviderArg,
    repeat: u32,
}

fn handle_run(
    cli: &CacheWeaveCli,
    config: &WeaveConfig,
    input: &Path,
    request: &RunRequest<'_>,
) -> Result<()> {
    let mut profiler = Profiler::new();
    let loaded = load_module(&mut profiler, input)?;
    let mut module = loaded.module;
    if request.weave {
        let report = weave_module(&mut profiler, config, input, &loaded.source, &mut module)?;
        print_report(&report);
    }

    let (ty, name) = request
        .method
        .rsplit_once("::")
        .ok_or_else(|| anyhow!("method must be written `Type::method`, got `{}`", request.method))?;
    let registry = ProviderRegistry::with_provider(request.provider.build());
    let interpreter = Interpreter::new(&module, registry);
    let (_, method) = interpreter
        .find_method(ty, name, Some(request.args.len()))
        .ok_or_else(|| anyhow!("no method `{ty}::{name}` taking {} argument(s)", request.args.len()))?;
    let args = method
        .params
        .iter()
        .zip(request.args)
        .map(|(param, text)| Value::parse_as(text, &param.ty))
        .collect::<Result<Vec<_>, _>>()?;
    let this = if method.is_static {
        None
    } else {
        Some(interpreter.instantiate(ty)?)
    };

    let mut elapsed = Duration::ZERO;
    for round in 1..=request.repeat.max(1) {
        let label = format!("Call {round}");
        let mut profile = Profiler::new();
        let result = profile.record_phase(&label, || {
            interpreter.invoke(ty, name, this.clone(), args.clone())
        })?;
        for phase in profile.phases() {
            elapsed += phase.duration;
            profiler.push_phase(&phase.name, phase.duration);
        }
        println!("{} {result}", format!("[{round}]").bold());
    }
    debug!(calls = request.repeat, elapsed_ms = elapsed.as_millis() as u64, "run finished");
    for line in interpreter.trace_log() {
        println!("{} {line}", "trace".cyan());
    }

    if cli.time {
        print_timings(profiler.phases());
    }
    Ok(())
}

struct LoadedModule {
    module: ModuleDef,
    source: String,
}

fn load_module(profiler: &mut Profiler, path: &Path) -> Result<LoadedModule> {
    let source = read_source(path)?;
    let source_id = path.display().to_string();
    let format = ModuleFormat::from_path(path);
    let module = match profiler.record_phase("Parsing", || decode_module(&source, format)) {
        Ok(module) => module,
        Err(DecodeError::Source(error)) => {
            emit_diagnostics(&error.diagnostics(&source_id), Some(&source));
            bail!("{error}");
        }
        Err(other) => {
            return Err(other).with_context(|| format!("failed to load {}", path.display()));
        }
    };
    Ok(LoadedModule { module, source })
}

fn weave_module(
    profiler: &mut Profiler,
    config: &WeaveConfig,
    path: &Path,
    source: &str,
    module: &mut ModuleDef,
) -> Result<WeaveReport> {
    let weaver = Weaver::new(config.clone()).with_source_id(path.display().to_string());
    match profiler.record_phase("Weaving", || weaver.run(module)) {
        Ok(report) => {
            emit_diagnostics(&report.diagnostics, Some(source));
            Ok(report)
        }
        Err(error @ WeaveError::Fatal(_)) => {
            emit_diagnostics(error.diagnostics(), Some(source));
            bail!("weaving failed");
        }
    }
}

fn print_report(report: &WeaveReport) {
    for member in &report.members {
        match &member.outcome {
            MemberOutcome::Woven {
                key,
                store_sites,
                invalidates_on_set,
            } => {
                let setter = if *invalidates_on_set { ", setter evicts" } else { "" };
                println!(
                    "{} {} key `{key}` ({store_sites} store site(s){setter})",
                    "woven".green().bold(),
                    member.member
                );
            }
            MemberOutcome::Skipped { reason } => {
                println!("{} {}: {reason}", "skipped".yellow().bold(), member.member);
            }
        }
    }
    for ty in &report.synthesized_accessors {
        println!("{} static cache accessor on {ty}", "added".blue().bold());
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn resolve_output_path(path: &Path, output: Option<PathBuf>, format: ModuleFormat) -> PathBuf {
    output.unwrap_or_else(|| {
        let stem = path
            .file_stem()
            .map_or_else(|| "module".into(), |stem| stem.to_string_lossy().into_owned());
        path.with_file_name(format!("{stem}.woven.{}", format.extension()))
    })
}

fn print_timings(phases: &[PhaseTiming]) {
    println!("{}", "[Timing]".bold());
    let mut total = Duration::ZERO;
    for PhaseTiming { name, duration } in phases {
        println!("{:>16}: {:>6.2} ms", name, duration.as_secs_f64() * 1000.0);
        total += *duration;
    }
    println!("{:>16}: {:>6.2} ms", "Total", total.as_secs_f64() * 1000.0);
}
