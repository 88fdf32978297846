//! Boot: start every processor and wait for them to stop.

use std::thread;

use anyhow::{anyhow, Result};
use kernel::task::CpuExit;
use kernel::{Kernel, KernelConfig, UserProgram};
use std::sync::Arc;

/// Build a kernel and create the initial environment running `program`.
pub fn boot(config: KernelConfig, program: Arc<dyn UserProgram>) -> Result<Kernel> {
    let kernel = Kernel::new(config).map_err(|e| anyhow!("invalid kernel configuration: {}", e))?;
    let name = program.name().to_owned();
    let id = kernel
        .create_env(program)
        .map_err(|e| anyhow!("creating initial environment '{}': {}", name, e))?;
    log::info!("boot: initial environment {} runs '{}'", id, name);
    Ok(kernel)
}

/// Run every configured processor on its own host thread until each one
/// stops, returning how each stopped, indexed by processor.
pub fn run_to_completion(kernel: &Kernel) -> Vec<CpuExit> {
    let ncpu = kernel.config().ncpu;
    if ncpu == 1 {
        return vec![kernel.run_cpu(0)];
    }
    thread::scope(|s| {
        let cpus: Vec<_> = (0..ncpu)
            .map(|cpu| s.spawn(move || kernel.run_cpu(cpu)))
            .collect();
        cpus.into_iter()
            .map(|h| match h.join() {
                Ok(exit) => exit,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}
