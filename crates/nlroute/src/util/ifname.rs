//! Interface name utilities.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

/// Error type for interface operations.
#[derive(Debug, thiserror::Error)]
pub enum IfError {
    #[error("interface not found: {0}")]
    NotFound(String),

    #[error("invalid interface name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IfError>;

/// Validate an interface name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(IfError::InvalidName("empty name".to_string()));
    }

    if name.len() >= IFNAMSIZ {
        return Err(IfError::InvalidName(format!(
            "name too long (max {} chars)",
            IFNAMSIZ - 1
        )));
    }

    if name.contains('/') || name.contains('\0') {
        return Err(IfError::InvalidName(
            "name contains invalid characters".to_string(),
        ));
    }

    if name.chars().any(|c| c.is_whitespace()) {
        return Err(IfError::InvalidName("name contains whitespace".to_string()));
    }

    Ok(())
}

/// Request block for SIOCGIFINDEX (the ifindex arm of struct ifreq).
#[repr(C)]
struct IfReqIndex {
    name: [libc::c_char; IFNAMSIZ],
    ifindex: libc::c_int,
    pad: [u8; 20],
}

/// Resolve an interface name to its index with the SIOCGIFINDEX ioctl.
pub fn name_to_index(name: &str) -> Result<u32> {
    validate(name)?;

    // SAFETY: plain socket(2) call; the descriptor is owned right after.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: fd is a freshly opened descriptor nobody else owns.
    let sock = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut req = IfReqIndex {
        name: [0; IFNAMSIZ],
        ifindex: 0,
        pad: [0; 20],
    };
    for (dst, src) in req.name.iter_mut().zip(name.bytes()) {
        *dst = src as libc::c_char;
    }

    // SAFETY: req is a properly sized ifreq that outlives the call.
    let ret = unsafe {
        libc::ioctl(
            sock.as_raw_fd(),
            libc::SIOCGIFINDEX as _,
            &mut req as *mut IfReqIndex,
        )
    };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENODEV) => Err(IfError::NotFound(name.to_string())),
            _ => Err(err.into()),
        };
    }

    u32::try_from(req.ifindex).map_err(|_| IfError::NotFound(name.to_string()))
}
