use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use ropwatch::{
    FrameRange, MonitorConfig, RenderEvent, RenderJob, RenderManager, format_duration,
};

#[derive(Parser, Debug)]
#[command(name = "ropwatch", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a batch render and monitor its progress.
    Render(RenderArgs),
    /// List a scene's out-nodes with their native render settings.
    Nodes(NodesArgs),
    /// Show recently opened scene files.
    History,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Scene file (.hip).
    #[arg(long)]
    hip: PathBuf,

    /// Out-node path, e.g. /out/Redshift_ROP1.
    #[arg(long)]
    out: String,

    /// Start frame; with --end this overrides the ROP's own range.
    #[arg(long, short = 's')]
    start: Option<i64>,

    /// End frame (inclusive).
    #[arg(long, short = 'e')]
    end: Option<i64>,

    /// Render every Nth frame of the override range.
    #[arg(long, short = 't', default_value_t = 1)]
    step: i64,

    /// Skip frames whose output files already exist.
    #[arg(long, default_value_t = false)]
    skip_existing: bool,

    /// Echo every raw renderer log line.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct NodesArgs {
    /// Scene file (.hip).
    #[arg(long)]
    hip: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Nodes(args) => cmd_nodes(args),
        Command::History => cmd_history(),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let range = match (args.start, args.end) {
        (Some(start), Some(end)) => Some(
            FrameRange::new(start, end, args.step)
                .context("invalid --start/--end/--step range")?,
        ),
        (None, None) => None,
        _ => anyhow::bail!("--start and --end must be given together"),
    };

    let mut job = RenderJob::new(&args.hip, &args.out).with_skip_existing(args.skip_existing);
    if let Some(range) = range {
        job = job.with_range(range);
    }

    let (sink, rx) = ropwatch::channel();
    let mut manager = RenderManager::new(MonitorConfig::default());
    manager
        .start_render(&job, sink)
        .context("failed to start render")?;

    let mut exit_code = None;
    let mut last_estimate = None;
    while let Ok(event) = rx.recv() {
        match event {
            RenderEvent::Output { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            RenderEvent::RawLine(line) => {
                if args.verbose {
                    println!("{line}");
                }
            }
            RenderEvent::FrameProgress { frame, percent } => {
                if args.verbose {
                    println!("   Frame {frame}: {percent}%");
                }
            }
            RenderEvent::ImageProduced { path } => {
                println!("   {:<8} {}", "Image", path.display());
            }
            RenderEvent::TimeLabels { estimate, .. } => {
                last_estimate = Some(estimate);
            }
            RenderEvent::Finished { exit_code: code } => {
                exit_code = code;
                break;
            }
            RenderEvent::Progress { .. }
            | RenderEvent::FrameCompleted { .. }
            | RenderEvent::FrameSkipped { .. } => {}
        }
    }
    manager.join_active();

    if let Some(estimate) = last_estimate {
        println!(
            "\nElapsed {} - average {} per frame",
            format_duration(estimate.elapsed),
            format_duration(estimate.average)
        );
    }

    match exit_code {
        Some(0) => Ok(()),
        Some(code) => anyhow::bail!("render process exited with status {code}"),
        None => anyhow::bail!("render process was terminated by a signal"),
    }
}

fn cmd_nodes(args: NodesArgs) -> anyhow::Result<()> {
    let nodes = ropwatch::rop::list_out_nodes(&args.hip)
        .with_context(|| format!("failed to probe '{}'", args.hip.display()))?;
    if nodes.is_empty() {
        println!("no supported out-nodes found");
        return Ok(());
    }
    for (path, settings) in nodes {
        println!(
            "{path}  frames {}-{}  skip-existing: {}",
            settings.start, settings.end, settings.skip_existing
        );
    }
    Ok(())
}

fn cmd_history() -> anyhow::Result<()> {
    let files = ropwatch::history::recent_hip_files();
    if files.is_empty() {
        println!("no render history found");
        return Ok(());
    }
    for file in files {
        println!("{file}");
    }
    Ok(())
}
