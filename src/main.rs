use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use matrixbeam::io::compression::{
    FinishWrite, auto_detect_reader, auto_detect_writer, is_compressed,
};
use matrixbeam::io::spool_to_tempfile;
use matrixbeam::logging::init_logging;
use matrixbeam::{
    CancellationContext, ErrorClass, MatrixError, MetricsCollector, PartitionStrategy,
    StreamConfig, TransposeConfig, Transposer, echo_matrix, flatten_matrix, product_matrix,
    sum_matrix,
};
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Environment variables with this prefix override the built-in defaults.
const ENV_PREFIX: &str = "MATRIXBEAM_";

/// Matrix transformations over CSV files too large for memory
#[derive(Parser, Debug)]
#[command(name = "matrixbeam")]
#[command(about = "Echo, transpose, flatten, sum or multiply a CSV matrix with bounded memory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Save operation metrics as JSON to this path
    #[arg(long, global = true)]
    metrics: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy the matrix unchanged
    Echo(StreamArgs),
    /// Transpose the matrix
    Invert(InvertArgs),
    /// Write every value on a single line
    Flatten(StreamArgs),
    /// Add up every value
    Sum(IoArgs),
    /// Multiply every value
    Multiply(IoArgs),
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file, or `-` for stdin
    #[arg(default_value = "-")]
    input: PathBuf,

    /// Output file (stdout when omitted); .gz/.zst/.bz2/.xz are compressed
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Field delimiter: one ASCII character, or `tab`
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Processing deadline in seconds; 0 disables it
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[command(flatten)]
    io: IoArgs,

    /// Accept matrices whose row and column counts differ
    #[arg(long)]
    allow_rectangular: bool,
}

#[derive(Args, Debug)]
struct InvertArgs {
    #[command(flatten)]
    io: IoArgs,

    /// Rows per in-memory block
    #[arg(long)]
    block_size: Option<usize>,

    /// Number of shards
    #[arg(long)]
    shards: Option<usize>,

    /// Directory for shard files (system temp dir by default)
    #[arg(long)]
    spill_dir: Option<PathBuf>,

    /// Give every shard the rounded-up column count, padding the overshoot
    #[arg(long)]
    legacy_partition: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level, cli.log_json) {
        eprintln!("matrixbeam: {e:#}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "operation failed");
            eprintln!("matrixbeam: {err:#}");
            exit_code(&err)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<MatrixError>().map(MatrixError::class) {
        Some(ErrorClass::BadInput) => ExitCode::from(2),
        Some(ErrorClass::Timeout) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let metrics = match &cli.command {
        Command::Echo(args) => run_stream(&args.io, args.allow_rectangular, StreamOp::Echo)?,
        Command::Flatten(args) => {
            run_stream(&args.io, args.allow_rectangular, StreamOp::Flatten)?
        }
        Command::Sum(args) => run_stream(args, false, StreamOp::Sum)?,
        Command::Multiply(args) => run_stream(args, false, StreamOp::Multiply)?,
        Command::Invert(args) => run_invert(args)?,
    };

    info!(metrics = %metrics.to_json(), "metrics");
    if let Some(path) = &cli.metrics {
        metrics.save_to_file(path)?;
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum StreamOp {
    Echo,
    Flatten,
    Sum,
    Multiply,
}

fn run_stream(args: &IoArgs, allow_rectangular: bool, op: StreamOp) -> Result<MetricsCollector> {
    let mut config = StreamConfig::from_env(ENV_PREFIX)?;
    if let Some(d) = &args.delimiter {
        config.delimiter = matrixbeam::config::parse_delimiter(d)?;
    }
    if let Some(secs) = args.timeout_secs {
        config.timeout = timeout_from_secs(secs);
    }
    if allow_rectangular {
        config.require_square = false;
    }

    let ctx = CancellationContext::from_timeout(config.timeout);
    let input = open_input(&args.input)?;
    let mut output = open_output(args.output.as_deref())?;
    let report = match op {
        StreamOp::Echo => echo_matrix(input, &mut output, &config, &ctx)?,
        StreamOp::Flatten => flatten_matrix(input, &mut output, &config, &ctx)?,
        StreamOp::Sum => sum_matrix(input, &mut output, &config, &ctx)?,
        StreamOp::Multiply => product_matrix(input, &mut output, &config, &ctx)?,
    };
    output.finish_stream().context("finish output")?;
    Ok(report.metrics)
}

fn run_invert(args: &InvertArgs) -> Result<MetricsCollector> {
    let mut config = TransposeConfig::from_env(ENV_PREFIX)?;
    if let Some(d) = &args.io.delimiter {
        config.delimiter = matrixbeam::config::parse_delimiter(d)?;
    }
    if let Some(secs) = args.io.timeout_secs {
        config.timeout = timeout_from_secs(secs);
    }
    if let Some(n) = args.block_size {
        config.block_size = n;
    }
    if let Some(n) = args.shards {
        config.shard_count = n;
    }
    if let Some(dir) = &args.spill_dir {
        config.spill_dir = Some(dir.clone());
    }
    if args.legacy_partition {
        config.partition = PartitionStrategy::Legacy;
    }

    let transposer = Transposer::new(config)?;
    let ctx = transposer.context();
    let input = open_seekable_input(&args.io.input, transposer.config().spill_dir.as_deref())?;
    let mut output = open_output(args.io.output.as_deref())?;
    let report = transposer.transpose(input, &mut output, &ctx)?;
    output.finish_stream().context("finish output")?;
    Ok(report.metrics)
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_stdio(path) {
        return auto_detect_reader(io::stdin().lock(), path);
    }
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    auto_detect_reader(file, path)
}

/// Plain files are used in place; stdin and compressed inputs are spooled to
/// a temp file first so the engine can rewind them.
fn open_seekable_input(path: &Path, spill_dir: Option<&Path>) -> Result<Box<dyn SeekRead>> {
    if !is_stdio(path) && !is_compressed(path)? {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        return Ok(Box::new(file));
    }
    let reader = open_input(path)?;
    let spooled = spool_to_tempfile(reader, spill_dir)
        .with_context(|| format!("spool {} to a temp file", path.display()))?;
    Ok(Box::new(spooled))
}

trait SeekRead: Read + Seek {}

impl<T: Read + Seek> SeekRead for T {}

fn open_output(path: Option<&Path>) -> Result<Box<dyn FinishWrite>> {
    match path {
        Some(path) if !is_stdio(path) => {
            let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
            auto_detect_writer(file, path)
        }
        _ => auto_detect_writer(io::stdout().lock(), "-"),
    }
}
