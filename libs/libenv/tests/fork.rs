//! Copy-on-write fork, driven through a real kernel instance.

use kernel::memory::paging::PagePerm;
use kernel::x86_64::structures::paging::PageTableFlags;
use kernel::{EnvId, Error, Kernel, KernelConfig, Resume, Segment, UserContext, UserError};
use libenv::entry::{Main, Program, PC_UMAIN};
use libenv::fork::{fork, sfork, ForkResult};
use libenv::memory::{read_u64, write_u64, DATA_BASE, HEAP_BASE, USTACKTOP, UTEXT};
use libenv::process::{exit, wait, yield_now};
use libenv::{uprintln, upanic};

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default().with_envs(16).with_frames(256)).unwrap()
}

/// Exits as soon as it runs.
struct Nop;

impl Main for Nop {
    const NAME: &'static str = "nop";

    fn data(&self) -> Vec<u8> {
        vec![7; 16]
    }

    fn segments(&self) -> Vec<Segment> {
        vec![Segment::bss(HEAP_BASE, 4096, PagePerm::Shared { writable: true })]
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        exit(cx)
    }
}

/// Start `main` under manual control, past library start-up.
fn started<M: Main>(k: &Kernel, main: M) -> (EnvId, UserContext<'_>) {
    let program = Program::new(main);
    let id = k.create_env(program.clone()).unwrap();
    let mut cx = k.attach(0, id).unwrap();
    assert_eq!(program.resume(&mut cx), Ok(Resume::Continue));
    assert_eq!(cx.tf().pc, PC_UMAIN);
    (id, cx)
}

#[test]
fn child_gets_every_user_page_plus_exception_stack() {
    let k = kernel();
    let before = k.free_frames();
    let (parent, mut cx) = started(&k, Nop);
    let own_pages = cx.uvpt_range(UTEXT, USTACKTOP).len();

    let child = match fork(&mut cx).unwrap() {
        ForkResult::Parent(child) => child,
        ForkResult::Child => panic!("parent took the child path"),
    };
    let child_maps = k.mappings(child).unwrap();
    assert_eq!(child_maps.len(), own_pages + 1);

    let parent_maps = k.mappings(parent).unwrap();
    for (va, pte) in child_maps.iter().filter(|(va, _)| va.as_u64() < USTACKTOP) {
        let (_, mine) = parent_maps.iter().find(|(pva, _)| pva == va).unwrap();
        assert_eq!(mine.frame, pte.frame, "page {:?} not shared", va);
        let child_perm = PagePerm::from_flags(pte.flags);
        let parent_perm = PagePerm::from_flags(mine.flags);
        if va.as_u64() == HEAP_BASE {
            assert_eq!(child_perm, Some(PagePerm::Shared { writable: true }));
            assert_eq!(parent_perm, child_perm);
        } else if va.as_u64() == UTEXT {
            assert_eq!(child_perm, Some(PagePerm::ReadOnly));
        } else {
            assert_eq!(child_perm, Some(PagePerm::CopyOnWrite), "page {:?}", va);
            assert_eq!(parent_perm, Some(PagePerm::CopyOnWrite), "page {:?}", va);
            assert!(!pte.flags.contains(PageTableFlags::WRITABLE));
        }
    }

    let child_info = k.env_info(child).unwrap();
    assert_eq!(child_info.parent_id, parent);
    assert_eq!(child_info.status, kernel::EnvStatus::Runnable);

    cx.detach();
    assert_eq!(k.run_cpu(0), kernel::task::CpuExit::Monitor);
    assert_eq!(k.free_frames(), before);
}

/// Parent writes V, forks; the child checks it sees V, writes V2 twice and
/// reports what each write cost; the parent then checks it still sees V.
struct CowDemo;

const V: u64 = 0x56;
const V2: u64 = 0x5632;

fn upcalls(cx: &UserContext<'_>) -> u64 {
    cx.env_info(EnvId::SELF).map_or(0, |info| info.pgfault_upcalls)
}

impl Main for CowDemo {
    const NAME: &'static str = "cowdemo";

    fn data(&self) -> Vec<u8> {
        V.to_le_bytes().to_vec()
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => {
                match fork(cx)? {
                    ForkResult::Parent(child) => {
                        cx.tf_mut().regs[1] = child.as_u32() as u64;
                        cx.tf_mut().pc = 2;
                    }
                    ForkResult::Child => cx.tf_mut().pc = 10,
                }
                Ok(Resume::Continue)
            }
            2 => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if !wait(cx, child) {
                    return yield_now(cx);
                }
                let seen = read_u64(cx, DATA_BASE)?;
                uprintln!(cx, "parent sees {:x}", seen)?;
                exit(cx)
            }
            10 => {
                let seen = read_u64(cx, DATA_BASE)?;
                if seen != V {
                    upanic!("child saw {:x}", seen);
                }
                let start = upcalls(cx);
                write_u64(cx, DATA_BASE, V2)?;
                let first = upcalls(cx) - start;
                write_u64(cx, DATA_BASE, V2 + 1)?;
                let second = upcalls(cx) - start - first;
                uprintln!(cx, "child write upcalls {} {}", first, second)?;
                exit(cx)
            }
            pc => upanic!("bad pc {}", pc),
        }
    }
}

#[test]
fn cow_write_is_private_and_costs_one_upcall() {
    let k = kernel();
    let before = k.free_frames();
    k.create_env(Program::new(CowDemo)).unwrap();
    k.run_cpu(0);

    let lines = k.console_lines();
    assert!(lines.iter().any(|l| l == "child write upcalls 1 0"), "{:?}", lines);
    assert!(lines.iter().any(|l| l == "parent sees 56"), "{:?}", lines);
    assert_eq!(k.free_frames(), before);
    assert!(k.stats().pages_copied >= 1);
}

/// Installs the copy-on-write handler and writes into its read-only text.
struct TextWriter;

impl Main for TextWriter {
    const NAME: &'static str = "textwriter";

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        libenv::pgfault::set_pgfault_handler(cx, libenv::fork::pgfault)?;
        cx.write(UTEXT, b"oops")?;
        upanic!("write to text succeeded");
    }
}

#[test]
fn write_fault_on_non_cow_page_destroys_env() {
    let k = kernel();
    let id = k.create_env(Program::new(TextWriter)).unwrap();
    k.run_cpu(0);
    assert!(k.env_info(id).is_none());
    let out = k.console_output();
    assert!(out.contains("user panic in textwriter: pgfault"), "{}", out);
    assert!(!out.contains("write to text succeeded"));
}

/// Writes into its text with no handler at all.
struct Unhandled;

impl Main for Unhandled {
    const NAME: &'static str = "unhandled";

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        cx.write(UTEXT, b"oops")?;
        exit(cx)
    }
}

#[test]
fn write_fault_without_upcall_is_killed_by_kernel() {
    let k = kernel();
    let id = k.create_env(Program::new(Unhandled)).unwrap();
    k.run_cpu(0);
    assert!(k.env_info(id).is_none());
    assert!(k.console_output().contains(&format!("[{}] user fault va {:08x}", id, UTEXT)));
}

/// A shared page stays shared: the child's write is visible to the parent.
struct SharedWriter;

impl Main for SharedWriter {
    const NAME: &'static str = "shared";

    fn segments(&self) -> Vec<Segment> {
        vec![Segment::bss(HEAP_BASE, 4096, PagePerm::Shared { writable: true })]
    }

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => {
                write_u64(cx, HEAP_BASE, 1)?;
                match fork(cx)? {
                    ForkResult::Parent(child) => {
                        cx.tf_mut().regs[1] = child.as_u32() as u64;
                        cx.tf_mut().pc = 2;
                    }
                    ForkResult::Child => {
                        write_u64(cx, HEAP_BASE, 42)?;
                        return exit(cx);
                    }
                }
                Ok(Resume::Continue)
            }
            2 => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if !wait(cx, child) {
                    return yield_now(cx);
                }
                let seen = read_u64(cx, HEAP_BASE)?;
                uprintln!(cx, "shared value {}", seen)?;
                exit(cx)
            }
            pc => upanic!("bad pc {}", pc),
        }
    }
}

#[test]
fn shared_page_writes_are_visible_across_fork() {
    let k = kernel();
    k.create_env(Program::new(SharedWriter)).unwrap();
    k.run_cpu(0);
    assert!(k.console_lines().iter().any(|l| l == "shared value 42"));
}

#[test]
fn sfork_is_not_implemented() {
    let k = kernel();
    let (_, mut cx) = started(&k, Nop);
    assert_eq!(sfork(&mut cx), Err(UserError::Syscall(Error::NoSys)));
    cx.detach();
}

/// Forks a child that never stops, lets it run, then destroys it.
struct Reaper;

impl Main for Reaper {
    const NAME: &'static str = "reaper";

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        match cx.tf().pc {
            PC_UMAIN => {
                match fork(cx)? {
                    ForkResult::Parent(child) => {
                        cx.tf_mut().regs[1] = child.as_u32() as u64;
                        cx.tf_mut().pc = 2;
                    }
                    ForkResult::Child => cx.tf_mut().pc = 10,
                }
                Ok(Resume::Continue)
            }
            2 => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if cx.env_info(child).map_or(0, |info| info.runs) < 3 {
                    return yield_now(cx);
                }
                libenv::syscall::sys_env_destroy(cx, child)?;
                cx.tf_mut().pc = 3;
                Ok(Resume::Continue)
            }
            3 => {
                let child = EnvId::from_raw(cx.tf().regs[1] as u32);
                if !wait(cx, child) {
                    return yield_now(cx);
                }
                uprintln!(cx, "child {} gone", child)?;
                exit(cx)
            }
            10 => {
                read_u64(cx, DATA_BASE)?;
                Ok(Resume::Continue)
            }
            pc => upanic!("bad pc {}", pc),
        }
    }
}

#[test]
fn parent_destroys_child_running_on_other_cpu() {
    let k = Kernel::new(KernelConfig::default().with_envs(16).with_cpus(2).with_frames(256)).unwrap();
    let before = k.free_frames();
    k.create_env(Program::new(Reaper)).unwrap();

    let exits: Vec<_> = std::thread::scope(|s| {
        let cpus: Vec<_> = (0..2).map(|cpu| s.spawn({
            let k = &k;
            move || k.run_cpu(cpu)
        })).collect();
        cpus.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(exits, [kernel::task::CpuExit::Monitor; 2]);
    assert!(k.console_lines().iter().any(|l| l.ends_with(" gone")), "{:?}", k.console_lines());
    assert!(k.live_envs().is_empty());
    assert_eq!(k.free_frames(), before);
}

/// Prints before forking in the same step, so the child's inherited
/// return register no longer holds the zero from `sys_exofork`.
struct ChattyFork;

impl Main for ChattyFork {
    const NAME: &'static str = "chatty";

    fn step(&self, cx: &mut UserContext<'_>) -> Result<Resume, UserError> {
        uprintln!(cx, "about to fork")?;
        match fork(cx)? {
            ForkResult::Parent(_) => uprintln!(cx, "parent")?,
            ForkResult::Child => uprintln!(cx, "child")?,
        }
        exit(cx)
    }
}

#[test]
fn child_is_recognised_after_syscall_earlier_in_step() {
    let k = kernel();
    let before = k.free_frames();
    k.create_env(Program::new(ChattyFork)).unwrap();
    assert_eq!(k.run_cpu(0), kernel::task::CpuExit::Monitor);

    let lines = k.console_lines();
    let count = |want: &str| lines.iter().filter(|l| *l == want).count();
    assert_eq!(count("about to fork"), 2, "{:?}", lines);
    assert_eq!(count("parent"), 1, "{:?}", lines);
    assert_eq!(count("child"), 1, "{:?}", lines);
    assert_eq!(k.free_frames(), before);
}
