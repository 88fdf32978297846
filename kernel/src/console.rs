//! Console output of user environments
//!
//! `sys_cputs` appends here. The console belongs to one kernel instance and
//! is read back by the host and the tests line by line.

use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Default)]
pub struct Console {
    output: String,
}

impl Console {
    pub const fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.output.push_str(s);
        for line in s.lines().filter(|l| !l.is_empty()) {
            log::info!(target: "console", "{}", line);
        }
    }

    /// Everything written so far.
    pub fn contents(&self) -> &str {
        &self.output
    }

    /// Completed and partial lines, in output order.
    pub fn lines(&self) -> Vec<String> {
        self.output.lines().map(String::from).collect()
    }
}
