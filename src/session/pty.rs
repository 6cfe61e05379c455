//! The production [Transport]: a child process attached to a pseudo-terminal.
//!
//! The child becomes a session leader with the pty slave as its controlling terminal, so `ssh`,
//! `rsync`, and `sudo` read passwords from it exactly as they would from a person's terminal.
//! Echo is disabled on the slave so that nothing written to the child reappears in its output.

use super::Transport;
use async_trait::async_trait;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{openpty, OpenptyResult};
use nix::sys::termios::{self, LocalFlags, OutputFlags, SetArg};
use nix::unistd;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::process::Stdio;
use tokio::io::unix::AsyncFd;
use tokio::process::{Child, Command};

/// A spawned transport process and the master side of its pty.
#[derive(Debug)]
pub struct PtyTransport {
    master: AsyncFd<OwnedFd>,

    /// Killed on drop, so aborting the task that owns this value also ends the process.
    child: Child,
}

impl PtyTransport {
    /// Spawns `argv` on a fresh pty.
    pub fn spawn(argv: &[String]) -> io::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let OpenptyResult { master, slave } = openpty(None, None).map_err(io::Error::from)?;
        quiet(slave.as_fd())?;
        set_nonblocking(master.as_fd())?;

        // The Command holds copies of the slave; it must be dropped after spawning so that
        // reading the master reports end of stream once the child exits.
        let child = {
            let mut command = Command::new(program);
            command
                .args(args)
                .stdin(Stdio::from(slave.try_clone()?))
                .stdout(Stdio::from(slave.try_clone()?))
                .stderr(Stdio::from(slave))
                .kill_on_drop(true);

            // SAFETY: setsid and ioctl are async-signal-safe, and the closure allocates nothing.
            unsafe {
                command.pre_exec(|| {
                    unistd::setsid().map_err(io::Error::from)?;
                    if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            command.spawn()?
        };

        Ok(PtyTransport {
            master: AsyncFd::new(master)?,
            child,
        })
    }
}

#[async_trait]
impl Transport for PtyTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| {
                unistd::read(inner.get_ref().as_raw_fd(), buf).map_err(io::Error::from)
            }) {
                // Linux reports a hung-up pty as EIO rather than a zero-length read.
                Ok(Err(err)) if err.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|inner| {
                unistd::write(inner.get_ref(), data).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        match self.child.kill().await {
            // Already reaped.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            result => result,
        }
    }
}

/// Turns off echo and CR/LF translation on the slave.
fn quiet(slave: BorrowedFd<'_>) -> io::Result<()> {
    let mut attrs = termios::tcgetattr(slave).map_err(io::Error::from)?;
    attrs.local_flags.remove(LocalFlags::ECHO | LocalFlags::ECHONL);
    attrs.output_flags.remove(OutputFlags::ONLCR);
    termios::tcsetattr(slave, SetArg::TCSANOW, &attrs).map_err(io::Error::from)
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}
