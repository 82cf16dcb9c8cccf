//! Datapath thread for the Linux host.
//!
//! One thread polls every enrolled uplink socket and every TAP device. Tagged
//! frames from an uplink go through the demultiplexer; frames the kernel
//! sends on a TAP go through the remultiplexer.

use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, info, trace, warn};

use super::LinuxHost;
use crate::datapath::Datapath;
use crate::frame::Frame;

/// Large enough for any non-GSO frame
const RX_BUF_SIZE: usize = 16384;

#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Idle poll timeout. Also bounds how long new devices wait to be polled.
    pub poll_timeout_ms: u16,
    /// Frames read from one fd before moving on to the next
    pub batch: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            batch: 64,
        }
    }
}

pub struct Reactor {
    datapath: Arc<Datapath<LinuxHost>>,
    config: ReactorConfig,
    shutdown: Receiver<()>,
    buf: Vec<u8>,
}

impl Reactor {
    pub fn new(
        datapath: Arc<Datapath<LinuxHost>>,
        config: ReactorConfig,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            datapath,
            config,
            shutdown,
            buf: vec![0u8; RX_BUF_SIZE],
        }
    }

    pub fn run(&mut self) {
        info!(poll_timeout_ms = self.config.poll_timeout_ms, "Datapath reactor started");

        loop {
            if self.shutdown.try_recv().is_ok() {
                info!("Datapath reactor shutting down");
                break;
            }
            self.poll_once();
        }

        info!("Datapath reactor stopped");
    }

    /// Wait for readiness on the current device set and drain ready fds.
    fn poll_once(&mut self) {
        let host = Arc::clone(self.datapath.host());
        let uplinks = host.uplinks();
        let taps = host.taps();

        let mut fds: Vec<PollFd<'_>> = uplinks
            .iter()
            .map(|s| PollFd::new(s.as_fd(), PollFlags::POLLIN))
            .chain(taps.iter().map(|t| PollFd::new(t.as_fd(), PollFlags::POLLIN)))
            .collect();

        match poll(&mut fds, PollTimeout::from(self.config.poll_timeout_ms)) {
            Ok(0) => return,
            Ok(_) => {}
            Err(Errno::EINTR) => return,
            Err(e) => {
                warn!(error = %e, "poll failed");
                return;
            }
        }

        let ready: Vec<bool> = fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN)))
            .collect();
        drop(fds);

        for (socket, _) in uplinks.iter().zip(&ready).filter(|(_, r)| **r) {
            for _ in 0..self.config.batch {
                match socket.recv(&mut self.buf) {
                    Ok(n) => {
                        let frame = Frame::from_slice(socket.index(), &self.buf[..n]);
                        let outcome = self.datapath.receive(frame, socket.index());
                        trace!(uplink = %socket.index(), ?outcome, "Received frame");
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!(uplink = %socket.index(), error = %e, "recv failed");
                        break;
                    }
                }
            }
        }

        for (tap, _) in taps
            .iter()
            .zip(&ready[uplinks.len()..])
            .filter(|(_, r)| **r)
        {
            for _ in 0..self.config.batch {
                match tap.read_frame(&mut self.buf) {
                    Ok(n) => {
                        let frame = Frame::from_slice(tap.index(), &self.buf[..n]);
                        self.datapath.transmit_from(tap.index(), frame);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!(tap = %tap.name(), error = %e, "TAP read failed");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle to the running reactor thread. Dropping it stops and joins the
/// thread.
pub struct ReactorHandle {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ReactorHandle {
    pub fn spawn(datapath: Arc<Datapath<LinuxHost>>, config: ReactorConfig) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let mut reactor = Reactor::new(datapath, config, shutdown_rx);

        let thread = std::thread::Builder::new()
            .name("vnic-datapath".to_string())
            .spawn(move || reactor.run())?;

        Ok(Self {
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown.try_send(());
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::tag::TagScheme;
    use std::time::Duration;

    #[test]
    fn test_reactor_stops_on_drop() {
        let datapath = Arc::new(Datapath::new(
            Arc::new(Registry::new()),
            Arc::new(LinuxHost::new()),
            TagScheme::Broadcom,
        ));
        let config = ReactorConfig {
            poll_timeout_ms: 5,
            ..Default::default()
        };

        let handle = ReactorHandle::spawn(datapath, config).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(handle.is_running());
        drop(handle);
    }

    #[test]
    fn test_default_config() {
        let config = ReactorConfig::default();
        assert_eq!(config.poll_timeout_ms, 100);
        assert_eq!(config.batch, 64);
    }
}
