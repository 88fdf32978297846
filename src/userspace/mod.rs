//! Bundled user programs

pub mod cow_demo;
pub mod forktree;
pub mod shared_page;

use std::sync::Arc;

use libenv::entry::Program;
use libenv::UserProgram;

pub const PROGRAMS: &[&str] = &["forktree", "cow_demo", "shared_page"];

/// Look up a bundled program by name.
pub fn by_name(name: &str, depth: usize) -> Option<Arc<dyn UserProgram>> {
    match name {
        "forktree" => Some(Program::new(forktree::ForkTree::new(depth))),
        "cow_demo" => Some(Program::new(cow_demo::CowDemo)),
        "shared_page" => Some(Program::new(shared_page::SharedPage)),
        _ => None,
    }
}
