use std::path::Path;
use std::time::Duration;

use regex::Regex;

use crate::expect::ExpectError;

// File operations on the remote machine
pub trait Remote {
    fn mkdir(&self, dir: &str, perms: u32) -> anyhow::Result<()>;
    // returns number of bytes uploaded
    fn upload(&self, src: &Path, dst: &str) -> anyhow::Result<u64>;
}

// An interactive shell on the remote machine
pub trait Shell {
    fn send_line(&mut self, line: &str) -> anyhow::Result<()>;
    // Wait for `pattern` to appear in the shell output. Returns everything before it.
    fn await_pattern(&mut self, pattern: &Regex, timeout: Duration) -> Result<String, ExpectError>;
    fn close(&mut self);
}

pub trait Transport: Remote + Shell {}

impl<T: Remote + Shell> Transport for T {}
