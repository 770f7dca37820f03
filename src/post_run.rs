//! Actions taken once a run's summary is out: an audible notification and an
//! optional reboot.

use crate::operator::OperatorChannel;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// The platform's immediate-reboot command.
pub fn reboot_command() -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("shutdown");
        cmd.args(["/r", "/t", "0"]);
        cmd
    } else {
        let mut cmd = Command::new("shutdown");
        cmd.args(["-r", "now"]);
        cmd
    }
}

/// Post-run actions, each performed at most once.
#[derive(Debug)]
pub struct PostRun {
    notify: bool,
    reboot: bool,
    /// Log the reboot instead of issuing it
    dry_run: bool,
    notified: bool,
    reboot_handled: bool,
}

impl PostRun {
    pub fn new(notify: bool, reboot: bool) -> Self {
        Self {
            notify,
            reboot,
            dry_run: false,
            notified: false,
            reboot_handled: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Ring the terminal bell. Returns whether it rang.
    pub async fn notify<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> io::Result<bool> {
        if !self.notify || self.notified {
            return Ok(false);
        }
        self.notified = true;

        out.write_all(b"\x07").await?;
        out.flush().await?;
        Ok(true)
    }

    /// Ask the operator, then reboot. Returns whether a reboot was issued.
    pub async fn reboot<O: OperatorChannel>(&mut self, operator: &mut O) -> io::Result<bool> {
        if !self.reboot || self.reboot_handled {
            return Ok(false);
        }
        self.reboot_handled = true;

        if !operator.confirm("Reboot now?").await? {
            log::info!("Reboot declined");
            return Ok(false);
        }

        if self.dry_run {
            log::info!("Dry run: would reboot now");
            return Ok(true);
        }

        log::warn!("Rebooting");
        let status = reboot_command().status().await?;
        if !status.success() {
            return Err(io::Error::other(format!("reboot command exited with {}", status)));
        }
        Ok(true)
    }
}
