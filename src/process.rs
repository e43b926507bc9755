// src/process.rs

//! Bounded execution of external commands
//!
//! Every tool this crate shells out to (tce-load, mount, lsblk, hooks) runs
//! with stdin closed and a wall-clock limit so a hung tool cannot stall the
//! whole run.

use crate::error::{Error, Result};
use nix::unistd::geteuid;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...`, killing it after `timeout`
pub fn run<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!("Executing: {} {:?}", program, args);

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandFailed(format!("Failed to spawn '{}': {}", program, e)))?;

    // Drain both pipes while waiting; a full pipe would block the child
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    match child.wait_timeout(timeout)? {
        Some(status) => {
            let stdout = collect(stdout_reader);
            let stderr = collect(stderr_reader);

            for line in stderr.lines() {
                debug!("[{}] {}", program, line);
            }

            Ok(CommandOutput {
                success: status.success(),
                code: status.code(),
                stdout,
                stderr,
            })
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            // Readers are left detached: a grandchild may still hold the pipes
            warn!("'{}' timed out after {} seconds", program, timeout.as_secs());
            Err(Error::CommandFailed(format!(
                "'{}' timed out after {} seconds",
                program,
                timeout.as_secs()
            )))
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> String {
    String::from_utf8_lossy(&reader.join().unwrap_or_default()).into_owned()
}

/// Run a command and turn a non-zero exit into an error
pub fn run_checked<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args, timeout)?;
    if !output.success {
        return Err(Error::CommandFailed(format!(
            "'{}' failed with exit code {}: {}",
            program,
            output.code.unwrap_or(-1),
            output.stderr.trim()
        )));
    }
    Ok(output)
}

/// Run a command as root, through `sudo -n` when not already root
pub fn run_privileged<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if geteuid().is_root() {
        return run_checked(program, args, timeout);
    }
    let mut argv: Vec<OsString> = vec![OsString::from("-n"), OsString::from(program)];
    argv.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
    run_checked("sudo", argv, timeout)
}

/// Run an argv-style hook (`["filetool.sh", "-b"]`)
pub fn run_argv(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::CommandFailed("Empty command".to_string()))?;
    run_checked(program, args, timeout)
}
