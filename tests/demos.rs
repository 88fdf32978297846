//! The copy-on-write and shared-page demos, end to end.

use envkern::boot::{boot, run_to_completion};
use envkern::userspace::{by_name, cow_demo, shared_page};
use envkern::KernelConfig;

fn run(program: &str, ncpu: usize) -> Vec<String> {
    let config = KernelConfig::default().with_cpus(ncpu).with_envs(16).with_frames(256);
    let kernel = boot(config, by_name(program, 0).unwrap()).unwrap();
    run_to_completion(&kernel);
    assert!(kernel.live_envs().is_empty());
    assert_eq!(kernel.free_frames(), 255);
    kernel.console_lines()
}

#[test]
fn child_write_does_not_reach_parent() {
    for ncpu in [1, 2] {
        let lines = run("cow_demo", ncpu);
        let has = |s: String| lines.iter().any(|l| *l == s);
        assert!(has(format!("parent: wrote {:x}", cow_demo::V)), "{:#?}", lines);
        assert!(has(format!("child: read {:x}", cow_demo::V)), "{:#?}", lines);
        assert!(has(format!("child: wrote {:x}", cow_demo::V2)), "{:#?}", lines);
        assert!(has(format!("parent: still reads {:x}", cow_demo::V)), "{:#?}", lines);
        assert!(!lines.iter().any(|l| l.contains("user panic")), "{:#?}", lines);
    }
}

#[test]
fn child_write_reaches_parent_through_shared_page() {
    let lines = run("shared_page", 1);
    let expected = format!("parent: shared page holds {:x}", shared_page::CHILD_VALUE);
    assert!(lines.iter().any(|l| *l == expected), "{:#?}", lines);
}

#[test]
fn cow_demo_copies_pages_on_write() {
    let config = KernelConfig::default().with_envs(16).with_frames(256);
    let kernel = boot(config, by_name("cow_demo", 0).unwrap()).unwrap();
    run_to_completion(&kernel);
    let stats = kernel.stats();
    assert!(stats.pages_marked_cow > 0);
    assert!(stats.pages_copied > 0);
    assert_eq!(stats.fatal, 0);
    assert_eq!(stats.upcalls, stats.total_faults);
}
