//! Kernel monitor
//!
//! The line-oriented console the system drops into once no environment can
//! run. Commands inspect the kernel: the frame pool, the environment table,
//! and the call stack of a user environment.

use alloc::vec::Vec;
use core::fmt::{self, Write};
use x86_64::VirtAddr;

use crate::log_buffer;
use crate::process::{EnvId, EnvStatus};
use crate::state::{Kernel, KernelState, HOST_CPU};
use crate::task::context::REG_FP;

/// Maximum number of words in one command line
pub const MAXARGS: usize = 16;

/// Deepest call chain `backtrace` will follow
pub const MAX_BACKTRACE_DEPTH: usize = 64;

/// Argument words shown per backtrace frame
const BACKTRACE_ARGS: usize = 5;

type CommandFn = fn(&Kernel, &[&str], &mut dyn Write) -> fmt::Result;

struct Command {
    name: &'static str,
    desc: &'static str,
    func: CommandFn,
}

static COMMANDS: &[Command] = &[
    Command {
        name: "help",
        desc: "Display this list of commands",
        func: mon_help,
    },
    Command {
        name: "kerninfo",
        desc: "Display information about the kernel",
        func: mon_kerninfo,
    },
    Command {
        name: "backtrace",
        desc: "Display the call stack of an environment (all if no envid)",
        func: mon_backtrace,
    },
    Command {
        name: "envs",
        desc: "List allocated environments",
        func: mon_envs,
    },
    Command {
        name: "log",
        desc: "Show the last N kernel log lines (default 20)",
        func: mon_log,
    },
];

/// Run the monitor over `input`, one command per line.
pub fn monitor<'a, I>(kernel: &Kernel, input: I, out: &mut dyn Write) -> fmt::Result
where
    I: IntoIterator<Item = &'a str>,
{
    out.write_str("Welcome to the kernel monitor!\n")?;
    out.write_str("Type 'help' for a list of commands.\n")?;
    for line in input {
        writeln!(out, "K> {}", line)?;
        runcmd(kernel, line, out)?;
    }
    Ok(())
}

/// Parse and execute one command line.
pub fn runcmd(kernel: &Kernel, line: &str, out: &mut dyn Write) -> fmt::Result {
    let mut argv: Vec<&str> = Vec::new();
    for word in line.split_whitespace() {
        if argv.len() == MAXARGS {
            return writeln!(out, "Too many arguments (max {})", MAXARGS);
        }
        argv.push(word);
    }
    let Some(&name) = argv.first() else {
        return Ok(());
    };

    match COMMANDS.iter().find(|c| c.name == name) {
        Some(cmd) => (cmd.func)(kernel, &argv, out),
        None => writeln!(out, "Unknown command '{}'", name),
    }
}

fn mon_help(_kernel: &Kernel, _argv: &[&str], out: &mut dyn Write) -> fmt::Result {
    for cmd in COMMANDS {
        writeln!(out, "{} - {}", cmd.name, cmd.desc)?;
    }
    Ok(())
}

fn mon_kerninfo(kernel: &Kernel, _argv: &[&str], out: &mut dyn Write) -> fmt::Result {
    let config = kernel.config();
    let st = kernel.lock(HOST_CPU);
    let total = st.mem.total_frames();
    let free = st.mem.free_frames();
    let live = st.envs.count(|s| s != EnvStatus::Free);
    let (referenced, refs) = st.mem.metadata_stats();
    writeln!(out, "Frames: {} total, {} free, {} in use", total, free, total - free)?;
    writeln!(out, "Frame references: {} frames mapped, {} mappings", referenced, refs)?;
    writeln!(out, "Environments: {} slots, {} allocated", st.envs.capacity(), live)?;
    writeln!(out, "Processors: {}, quantum {} steps", config.ncpu, config.quantum)?;
    writeln!(out, "{}", kernel.stats())
}

fn mon_envs(kernel: &Kernel, _argv: &[&str], out: &mut dyn Write) -> fmt::Result {
    let st = kernel.lock(HOST_CPU);
    for env in st.envs.iter().filter(|e| e.status != EnvStatus::Free) {
        let info = env.info();
        let cpu = match info.cpunum {
            Some(c) => c as i64,
            None => -1,
        };
        writeln!(
            out,
            "{} parent {} {:?} cpu {} runs {} upcalls {} pages {} {}",
            info.id,
            info.parent_id,
            info.status,
            cpu,
            info.runs,
            info.pgfault_upcalls,
            info.mapped_pages,
            env.name()
        )?;
    }
    Ok(())
}

fn mon_log(_kernel: &Kernel, argv: &[&str], out: &mut dyn Write) -> fmt::Result {
    let count = match argv.get(1) {
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return writeln!(out, "log: bad line count '{}'", arg),
        },
        None => 20,
    };
    let text = log_buffer::read_all();
    let lines: Vec<&str> = text.lines().collect();
    for line in &lines[lines.len().saturating_sub(count)..] {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

fn mon_backtrace(kernel: &Kernel, argv: &[&str], out: &mut dyn Write) -> fmt::Result {
    let st = kernel.lock(HOST_CPU);
    let targets: Vec<usize> = match argv.get(1) {
        Some(arg) => {
            let parsed = parse_envid(arg).and_then(|id| st.envs.envid2env(id, None, false).ok());
            match parsed {
                Some(idx) => alloc::vec![idx],
                None => return writeln!(out, "backtrace: no such environment '{}'", arg),
            }
        }
        None => st
            .envs
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status != EnvStatus::Free)
            .map(|(idx, _)| idx)
            .collect(),
    };

    for idx in targets {
        backtrace(&st, idx, out)?;
    }
    Ok(())
}

/// Walk the saved frame-pointer chain of environment `idx`.
///
/// Each frame holds the caller's frame pointer at `[fp]`, the return pc at
/// `[fp + 8]` and the first arguments above that.
fn backtrace(st: &KernelState, idx: usize, out: &mut dyn Write) -> fmt::Result {
    let env = st.envs.get(idx);
    writeln!(out, "Stack backtrace of {} (pc {:08x}):", env.id, env.tf.pc)?;
    let mut fp = env.tf.regs[REG_FP];
    let mut depth = 0;
    while fp != 0 {
        if depth == MAX_BACKTRACE_DEPTH {
            return writeln!(out, "  ... truncated at depth {}", MAX_BACKTRACE_DEPTH);
        }
        let mut words = [0u64; 2 + BACKTRACE_ARGS];
        for (i, word) in words.iter_mut().enumerate() {
            match read_word(st, idx, fp.wrapping_add(8 * i as u64)) {
                Some(w) => *word = w,
                None => return writeln!(out, "  fp {:08x}  <unmapped>", fp),
            }
        }
        write!(out, "  fp {:08x}  pc {:08x}  args", fp, words[1])?;
        for arg in &words[2..] {
            write!(out, " {:08x}", arg)?;
        }
        out.write_char('\n')?;
        fp = words[0];
        depth += 1;
    }
    Ok(())
}

fn read_word(st: &KernelState, idx: usize, va: u64) -> Option<u64> {
    let pt = st.pgdir(idx).ok()?;
    let mut raw = [0u8; 8];
    pt.read_bytes(&st.mem, VirtAddr::try_new(va).ok()?, &mut raw).ok()?;
    Some(u64::from_le_bytes(raw))
}

fn parse_envid(arg: &str) -> Option<EnvId> {
    let digits = arg.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).ok().map(EnvId::from_raw)
}
