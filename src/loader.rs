// Run SQL files one at a time in a remote shell, checking each one's exit status.
//
// The batch runner's own exit status doesn't reliably make it back to us through an
// interactive shell, so after each file we ask the shell for `$?` and read it out of
// the echoed RETCODE marker.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info};

use crate::config::{FileSet, LoadConfig};
use crate::error::LoadError;
use crate::expect::ExpectError;
use crate::progress_message::Progress;
use crate::remote::Transport;
use crate::ssh::mask;
use crate::transfer;

// The split quoting keeps the shell's echo of this line from matching PROMPT_RE
const SET_PROMPT: &str = "stty -echo; unset PROMPT_COMMAND; PS2=''; PS1='[RL''OAD]> '";
const PROMPT_RE: &str = r"\[RLOAD\]> ";

const RETCODE_CMD: &str = "echo RETCODE:$?";
const RETCODE_RE: &str = r"RETCODE:(\d+)";

// `echo` answers straight away
const ECHO_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one SQL file
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub file: String,
    pub exit_code: i32,
    pub output: String,
}

/// The one remote connection of a run. Closed exactly once, when dropped.
pub struct Session<'a> {
    transport: Box<dyn Transport>,
    config: &'a LoadConfig,
    prompt: Regex,
}

impl<'a> Session<'a> {
    pub fn open<F>(config: &'a LoadConfig, connect: F) -> Result<Session<'a>, LoadError>
    where
        F: FnOnce(&LoadConfig) -> anyhow::Result<Box<dyn Transport>>,
    {
        let target = &config.target;
        debug!("connecting to {}@{}:{}", target.username, target.host, target.port);
        let transport = connect(config).map_err(|err| LoadError::Connect {
            username: target.username.clone(),
            host: target.host.clone(),
            reason: format!("{err:#}"),
        })?;
        Ok(Session {
            transport,
            config,
            prompt: prompt_regex(),
        })
    }

    /// Copy the local data directory to the remote one, over this session
    pub fn transfer(&self, progress: &dyn Fn(Progress)) -> Result<(), LoadError> {
        transfer::transfer_directory(
            &*self.transport,
            &self.config.local_dir,
            &self.config.remote_dir,
            progress,
        )
    }

    /// Switch the remote shell to a prompt we can recognise, and wait for it.
    /// Must be called once before `run_file`.
    pub fn sync_prompt(&mut self) -> Result<(), LoadError> {
        self.send(SET_PROMPT)?;
        let motd = self.wait_prompt(self.config.prompt_timeout)?;
        debug!("remote shell ready, skipped {} bytes of login output", motd.len());
        Ok(())
    }

    /// Run one SQL file, remote_file is the full remote path.
    /// Returns exit code and whatever the runner printed.
    pub fn run_file(&mut self, remote_file: &str) -> Result<(i32, String), LoadError> {
        let cfg = self.config;
        let cmd = format!(
            "{} -q -o /dev/null -d {} -w {} -f {remote_file}",
            cfg.client, cfg.target.db_name, cfg.target.db_password
        );
        debug!("run: {}", mask(&cmd, &cfg.target.db_password));
        self.send(&cmd)?;
        let output = self.wait_prompt(cfg.prompt_timeout)?;

        self.send(RETCODE_CMD)?;
        let ret = self.wait_prompt(ECHO_TIMEOUT)?;
        let exit_code = parse_retcode(&ret)?;
        debug!("{remote_file} exit code {exit_code}");

        Ok((exit_code, output.trim().to_string()))
    }

    /// Run every file in order, stopping at the first that fails
    pub fn load_all(
        &mut self,
        files: &FileSet,
        progress: &dyn Fn(Progress),
    ) -> Result<Vec<LoadResult>, LoadError> {
        let mut results = Vec::with_capacity(files.len());
        for file in files.iter() {
            progress(Progress::Loading(file.to_string()));
            let t_start = Instant::now();
            let remote_file = self.config.remote_path(file);
            let (exit_code, output) = self.run_file(&remote_file)?;
            if exit_code != 0 {
                return Err(LoadError::Load {
                    file: file.to_string(),
                    exit_code,
                    output,
                });
            }
            progress(Progress::Loaded(file.to_string(), t_start.elapsed()));
            results.push(LoadResult {
                file: file.to_string(),
                exit_code,
                output,
            });
        }
        Ok(results)
    }

    fn send(&mut self, line: &str) -> Result<(), LoadError> {
        self.transport
            .send_line(line)
            .map_err(|err| LoadError::Protocol(format!("sending to remote shell: {err:#}")))
    }

    fn wait_prompt(&mut self, timeout: Duration) -> Result<String, LoadError> {
        match self.transport.await_pattern(&self.prompt, timeout) {
            Ok(captured) => Ok(captured),
            Err(ExpectError::Timeout { after, seen, .. }) => {
                debug!("output before timeout: {seen}");
                Err(LoadError::timeout("shell prompt", after))
            }
            Err(ExpectError::Eof { seen, .. }) => Err(LoadError::Protocol(format!(
                "remote shell closed, last output: {}",
                seen.trim()
            ))),
            Err(err) => Err(LoadError::Protocol(err.to_string())),
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        debug!("closing session to {}", self.config.target.host);
        self.transport.close();
    }
}

/// Copy, connect, load. The session is closed on the way out whatever happens.
pub fn run<F>(
    config: &LoadConfig,
    connect: F,
    progress: &dyn Fn(Progress),
) -> Result<Vec<LoadResult>, LoadError>
where
    F: FnOnce(&LoadConfig) -> anyhow::Result<Box<dyn Transport>>,
{
    transfer::check_files_present(&config.local_dir, &config.files)?;

    let mut session = Session::open(config, connect)?;
    session.transfer(progress)?;
    session.sync_prompt()?;

    let t_start = Instant::now();
    let results = session.load_all(&config.files, progress)?;
    info!("loaded {} files into {}", results.len(), config.target.db_name);
    progress(Progress::Finished(results.len(), t_start.elapsed()));
    Ok(results)
}

/// Extract n from the first `RETCODE:<n>` in `text`
pub fn parse_retcode(text: &str) -> Result<i32, LoadError> {
    static RETCODE: OnceLock<Regex> = OnceLock::new();
    let re = RETCODE.get_or_init(|| Regex::new(RETCODE_RE).unwrap());
    let caps = re
        .captures(text)
        .ok_or_else(|| LoadError::Protocol(format!("no RETCODE marker in {text:?}")))?;
    caps[1]
        .parse()
        .map_err(|err| LoadError::Protocol(format!("bad RETCODE '{}': {err}", &caps[1])))
}

fn prompt_regex() -> Regex {
    Regex::new(PROMPT_RE).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retcode() {
        assert_eq!(parse_retcode("RETCODE:0").unwrap(), 0);
        assert_eq!(parse_retcode("RETCODE:17").unwrap(), 17);
        assert_eq!(parse_retcode("\r\nRETCODE:255\r\n").unwrap(), 255);
    }

    #[test]
    fn test_parse_retcode_missing_marker() {
        for text in ["", "echo RETCODE:$?", "RETCODE:", "retcode:0"] {
            assert!(
                matches!(parse_retcode(text), Err(LoadError::Protocol(_))),
                "{text:?}"
            );
        }
    }

    #[test]
    fn test_parse_retcode_overflow_is_protocol_error() {
        assert!(matches!(
            parse_retcode("RETCODE:99999999999"),
            Err(LoadError::Protocol(_))
        ));
    }

    #[test]
    fn test_prompt_echo_does_not_match() {
        // with echo still on, the shell shows our line back to us first
        let re = prompt_regex();
        assert!(!re.is_match(SET_PROMPT));
        assert!(re.is_match("\r\n[RLOAD]> "));
    }
}
