use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use regex::Regex;
use ssh2::{Channel, OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, warn};

use crate::config::Target;
use crate::expect::{Expect, ExpectError};
use crate::remote::{Remote, Shell};

// Give libssh2 data in chunks of 128 KiB. An sftp packet is 32 KiB, libssh2 splits it.
const SFTP_CHUNK_SIZE: usize = 128 * 1024;

// Wide enough that our command lines never wrap
const PTY_WIDTH: u32 = 512;
const PTY_HEIGHT: u32 = 24;

// Limit on any single blocking libssh2 call after login: sftp packets, shell writes.
// Prompt waits poll non-blocking and have their own, longer, timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

// Don't hang on a dead VM when saying goodbye
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

//
// Public API
// Start with: SSH::new
//

pub struct SSH {
    // these two come first because they must be dropped before 'session'
    shell: Expect<Channel>,
    sftp: Sftp,
    session: Session,
    is_closed: bool,
}

impl SSH {
    // connect, authenticate with password, open sftp and an interactive shell
    pub fn new(target: &Target, auth_timeout: Duration) -> anyhow::Result<SSH> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("no address found for {}", target.host))?;
        let tcp = TcpStream::connect_timeout(&addr, auth_timeout)
            .with_context(|| format!("connect to {addr}"))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        // bound the handshake and password exchange
        set_io_timeout(&session, auth_timeout);
        session.handshake().context("SSH handshake")?;

        // Host key is not checked, these are throwaway VMs whose key changes on every
        // rebuild. Same as scp -oStrictHostKeyChecking=no -oUserKnownHostsFile=/dev/null
        debug!("SSH handshake with {addr} done");

        session
            .userauth_password(&target.username, &target.password)
            .context("password authentication")?;
        if !session.authenticated() {
            bail!("password rejected for {}", target.username);
        }
        set_io_timeout(&session, IO_TIMEOUT);

        let sftp = session.sftp().context("SFTP init")?;

        let mut channel = session.channel_session()?;
        channel
            .request_pty("dumb", None, Some((PTY_WIDTH, PTY_HEIGHT, 0, 0)))
            .context("request pty")?;
        channel.shell().context("start remote shell")?;
        debug!("remote shell open on {}", target.host);

        Ok(SSH {
            shell: Expect::new(channel),
            sftp,
            session,
            is_closed: false,
        })
    }
}

impl Remote for SSH {
    // make remote directory. It existing already is fine.
    fn mkdir(&self, dir: &str, perms: u32) -> anyhow::Result<()> {
        let path = Path::new(dir);
        if let Err(err) = self.sftp.mkdir(path, perms as i32) {
            // OpenSSH says FAILURE rather than FILE_ALREADY_EXISTS, so ask
            let is_dir = self.sftp.stat(path).map(|s| s.is_dir()).unwrap_or(false);
            if !is_dir {
                return Err(anyhow!("mkdir {dir}: {err}"));
            }
        }
        Ok(())
    }

    // Upload a local file to remote
    //
    // src: local path of file to upload
    // dst: remote full path of destination file to create or overwrite
    fn upload(&self, src: &Path, dst: &str) -> anyhow::Result<u64> {
        let data = fs::read(src)?;
        let perms = fs::metadata(src)?.permissions().mode() & 0o777;

        let mut sfile = self
            .sftp
            .open_mode(
                Path::new(dst),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                perms as i32,
                OpenType::File,
            )
            .with_context(|| format!("sftp open remote {dst}"))?;

        for chunk in data.chunks(SFTP_CHUNK_SIZE) {
            std::io::Write::write_all(&mut sfile, chunk)
                .with_context(|| format!("upload to {dst}"))?;
        }
        Ok(data.len() as u64)
    }
}

impl Shell for SSH {
    fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.shell.send_line(line)?;
        Ok(())
    }

    fn await_pattern(&mut self, pattern: &Regex, timeout: Duration) -> Result<String, ExpectError> {
        // Non-blocking only while we poll, sftp and writes want blocking mode
        self.session.set_blocking(false);
        let out = self.shell.expect(pattern, timeout);
        self.session.set_blocking(true);
        out
    }

    fn close(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;
        set_io_timeout(&self.session, CLOSE_TIMEOUT);
        let channel = self.shell.get_mut();
        if let Err(err) = channel.close() {
            warn!("closing remote shell: {err}");
        }
        if let Err(err) = self.session.disconnect(None, "load finished", None) {
            warn!("ssh disconnect: {err}");
        }
    }
}

impl Drop for SSH {
    fn drop(&mut self) {
        self.close();
    }
}

// Stands in for SSH on --dry-run, reports what would really happen
pub struct MockSSH {
    // printed as *** whenever it shows up in a command line
    secret: String,
    last_line: String,
}

impl MockSSH {
    pub fn new(secret: &str) -> MockSSH {
        MockSSH {
            secret: secret.to_string(),
            last_line: String::new(),
        }
    }
}

impl Remote for MockSSH {
    fn mkdir(&self, dir: &str, perms: u32) -> anyhow::Result<()> {
        println!("would mkdir {dir} with perms {perms:o}");
        Ok(())
    }
    fn upload(&self, src: &Path, dst: &str) -> anyhow::Result<u64> {
        println!("would upload {} -> {dst}", src.display());
        Ok(fs::metadata(src)?.len())
    }
}

impl Shell for MockSSH {
    fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        println!("would run '{}'", mask(line, &self.secret));
        self.last_line = line.to_string();
        Ok(())
    }
    // pretend every command worked
    fn await_pattern(&mut self, _: &Regex, _: Duration) -> Result<String, ExpectError> {
        if self.last_line.contains("RETCODE") {
            Ok("RETCODE:0\r\n".to_string())
        } else {
            Ok(String::new())
        }
    }
    fn close(&mut self) {
        println!("would disconnect");
    }
}

/// Replace `secret` in `line` with ***
pub fn mask(line: &str, secret: &str) -> String {
    if secret.is_empty() {
        return line.to_string();
    }
    line.replace(secret, "***")
}

// libssh2 takes 0 to mean wait forever, so never hand it 0
fn millis(d: Duration) -> u32 {
    let ms: u32 = d.as_millis().try_into().unwrap_or(u32::MAX);
    ms.max(1)
}

fn set_io_timeout(session: &Session, d: Duration) {
    session.set_timeout(millis(d));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(
            mask("vsql -d gas -w gaspwd -f x.sql", "gaspwd"),
            "vsql -d gas -w *** -f x.sql"
        );
        assert_eq!(mask("echo hi", ""), "echo hi");
    }

    #[test]
    fn test_millis_never_unbounded() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(5)), 5000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_io_timeout_is_bounded() {
        let session = Session::new().unwrap();
        assert_eq!(session.timeout(), 0);
        set_io_timeout(&session, IO_TIMEOUT);
        assert_eq!(session.timeout(), 30_000);
        set_io_timeout(&session, CLOSE_TIMEOUT);
        assert_eq!(session.timeout(), 5_000);
        set_io_timeout(&session, Duration::ZERO);
        assert_ne!(session.timeout(), 0);
    }

    #[test]
    fn test_mock_upload_missing_file_errors() {
        let m = MockSSH::new("pw");
        assert!(m
            .upload(Path::new("/no/such/file.sql"), "/tmp/oil_data/file.sql")
            .is_err());
    }

    #[test]
    fn test_mock_answers_retcode_zero() {
        let mut m = MockSSH::new("pw");
        let any = Regex::new("x").unwrap();
        m.send_line("vsql -w pw -f a.sql").unwrap();
        assert_eq!(m.await_pattern(&any, Duration::ZERO).unwrap(), "");
        m.send_line("echo RETCODE:$?").unwrap();
        assert!(m
            .await_pattern(&any, Duration::ZERO)
            .unwrap()
            .contains("RETCODE:0"));
    }
}
