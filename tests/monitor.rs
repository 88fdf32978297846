//! Dropping into the monitor once the system is idle.

use envkern::boot::{boot, run_to_completion};
use envkern::userspace::by_name;
use envkern::KernelConfig;
use kernel::monitor::monitor;

#[test]
fn monitor_runs_after_all_environments_exit() {
    let config = KernelConfig::default().with_envs(32).with_frames(512);
    let kernel = boot(config, by_name("forktree", 2).unwrap()).unwrap();
    run_to_completion(&kernel);
    assert!(kernel
        .console_lines()
        .last()
        .is_some_and(|l| l == "No runnable environments in the system!"));

    let mut out = String::new();
    monitor(&kernel, ["help", "kerninfo", "envs", "bogus"], &mut out).unwrap();
    assert!(out.starts_with("Welcome to the kernel monitor!"));
    assert!(out.contains("backtrace - "));
    assert!(out.contains("Frames: 512 total, 511 free, 1 in use"));
    assert!(out.contains("Environments: 32 slots, 0 allocated"));
    assert!(out.contains("Unknown command 'bogus'"));
}

#[test]
fn bad_configuration_is_rejected_at_boot() {
    let config = KernelConfig::default().with_envs(12);
    assert!(boot(config, by_name("forktree", 1).unwrap()).is_err());
}
