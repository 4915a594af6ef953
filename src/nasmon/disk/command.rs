// Nasmon - NAS enclosure and disk statistics agent
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::disk::core::{DiskError, DiskErrorKind};
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Exit status and standard output of a finished command.
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
}

/// Run `program` with `args`, waiting at most `timeout` for it to exit.
///
/// Output is read on a separate thread so a chatty command can't fill the pipe
/// and stall while we wait for it. If the command doesn't finish in time it is
/// killed and a `Timeout` error is returned.
pub(crate) fn run(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, DiskError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| DiskError::KindMsgCause(DiskErrorKind::Command, "unable to start command", Box::new(e)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or(DiskError::KindMsg(DiskErrorKind::Command, "command stdout not captured"))?;

    let reader = thread::spawn(move || {
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).map(|_| buf)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                // Killing can fail if the process exited in the meantime, either way reap it
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(message = "killed command after timeout", program = program, args = ?args);
                return Err(DiskError::KindMsgDetail(
                    DiskErrorKind::Timeout,
                    "command did not finish in time",
                    program.to_owned(),
                ));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(DiskError::KindMsgCause(
                    DiskErrorKind::Command,
                    "unable to wait for command",
                    Box::new(e),
                ))
            }
        }
    };

    let stdout = reader
        .join()
        .map_err(|_| DiskError::KindMsg(DiskErrorKind::Io, "command output reader panicked"))?
        .map_err(|e| DiskError::KindMsgCause(DiskErrorKind::Io, "unable to read command output", Box::new(e)))?;

    tracing::trace!(message = "command finished", program = program, args = ?args, status = %status);
    Ok(CommandOutput { status, stdout })
}

#[cfg(test)]
mod test {
    use super::run;
    use crate::disk::core::DiskErrorKind;
    use std::time::Duration;

    #[test]
    fn test_run_success() {
        let out = run("echo", &["hello"], Duration::from_secs(5)).unwrap();
        assert!(out.status.success());
        assert_eq!("hello", out.stdout.trim());
    }

    #[test]
    fn test_run_non_zero_exit() {
        let out = run("false", &[], Duration::from_secs(5)).unwrap();
        assert!(!out.status.success());
    }

    #[test]
    fn test_run_missing_program() {
        let res = run("/nonexistent/nasmon-test-binary", &[], Duration::from_secs(5));
        assert_eq!(DiskErrorKind::Command, res.unwrap_err().kind());
    }

    #[test]
    fn test_run_timeout() {
        let res = run("sleep", &["5"], Duration::from_millis(100));
        assert_eq!(DiskErrorKind::Timeout, res.unwrap_err().kind());
    }
}
