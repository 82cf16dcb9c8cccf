//! TAP devices backing virtual interfaces.
//!
//! The device exists for as long as the `TapDevice` is alive: it is not made
//! persistent, so closing the file descriptor removes it from the host.

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::libc::{self, IFF_NO_PI, IFF_TAP, IFNAMSIZ, c_char, c_short};

use super::ifreq;
use crate::device::IfIndex;

const TUNSETIFF: libc::Ioctl = 0x400454ca as libc::Ioctl;

#[repr(C)]
struct IfReq {
    ifr_name: [c_char; IFNAMSIZ],
    ifr_flags: c_short,
    _pad: [u8; 22],
}

pub struct TapDevice {
    name: String,
    index: IfIndex,
    file: File,
}

impl TapDevice {
    /// Create a non-blocking Ethernet TAP device called `name`.
    pub fn create(name: &str) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open("/dev/net/tun")?;

        let mut ifr = IfReq {
            ifr_name: ifreq::ifr_name(name)?,
            ifr_flags: (IFF_TAP | IFF_NO_PI) as c_short,
            _pad: [0; 22],
        };

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // The kernel writes back the name it actually used
        let name = unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let index = ifreq::index(&name)?;

        Ok(Self { name, index, file })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> IfIndex {
        self.index
    }

    /// Read one Ethernet frame. Fails with `WouldBlock` when none is queued.
    pub fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    pub fn write_frame(&self, frame: &[u8]) -> io::Result<usize> {
        (&self.file).write(frame)
    }
}

impl AsFd for TapDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}
