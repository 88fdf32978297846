//! Boot a kernel, run a bundled user program to completion on the
//! configured processors, then enter the kernel monitor.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use envkern::boot::{boot, run_to_completion};
use envkern::userspace::{self, forktree};
use kernel::logger;
use kernel::monitor;
use kernel::KernelConfig;
use log::LevelFilter;

#[derive(Parser)]
#[command(about = "Run a user program on the environment kernel")]
struct Args {
    /// Program to start: forktree, cow_demo or shared_page
    #[arg(long, default_value = "forktree")]
    program: String,
    /// Number of simulated processors
    #[arg(long, default_value_t = 1)]
    cpus: usize,
    /// Environment table size (power of two)
    #[arg(long, default_value_t = 1024)]
    envs: usize,
    /// Physical frames in the pool
    #[arg(long, default_value_t = 4096)]
    frames: usize,
    /// Program steps per time slice
    #[arg(long, default_value_t = 8)]
    quantum: usize,
    /// forktree depth
    #[arg(long, default_value_t = forktree::DEFAULT_DEPTH)]
    depth: usize,
    /// Kernel log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
    /// Read monitor commands from stdin after the run
    #[arg(long)]
    interactive: bool,
}

fn serial_out(line: &str) {
    eprint!("{}", line);
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow!("bad log level '{}'", args.log_level))?;
    logger::init(level);
    logger::set_sink(serial_out);

    if args.depth > forktree::MAX_DEPTH {
        bail!("depth {} exceeds the maximum of {}", args.depth, forktree::MAX_DEPTH);
    }
    let Some(program) = userspace::by_name(&args.program, args.depth) else {
        bail!(
            "unknown program '{}' (available: {})",
            args.program,
            userspace::PROGRAMS.join(", ")
        );
    };

    let config = KernelConfig::default()
        .with_cpus(args.cpus)
        .with_envs(args.envs)
        .with_frames(args.frames)
        .with_quantum(args.quantum);
    let kernel = boot(config, program)?;
    let exits = run_to_completion(&kernel);
    log::info!("processors stopped: {:?}", exits);

    let mut stdout = io::stdout().lock();
    stdout.write_all(kernel.console_output().as_bytes())?;

    let mut out = String::new();
    if args.interactive {
        let lines: Vec<String> = io::stdin().lock().lines().collect::<Result<_, _>>()?;
        monitor::monitor(&kernel, lines.iter().map(String::as_str), &mut out)?;
    } else {
        monitor::monitor(&kernel, ["kerninfo"], &mut out)?;
    }
    stdout.write_all(out.as_bytes())?;
    Ok(())
}
