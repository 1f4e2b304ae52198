use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Read half of a TTY. Reads wake every ~100 ms (VTIME) so the stop flag is
/// observed; an idle line is not reported as EOF.
pub(crate) struct TtyReader {
    file: File,
    stop: Arc<AtomicBool>,
}

impl Read for TtyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.file.read(buf) {
                Ok(0) => continue,
                Ok(n) => return Ok(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::Interrupted
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Open a serial device for line I/O at `baud_rate`.
///
/// Returns the read half, the write half, and a closure that stops the reader.
pub(crate) fn open(port: &str, baud_rate: u32) -> Result<(TtyReader, File, impl FnOnce() + Send)> {
    let path = Path::new(port);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open serial device {}", path.display()))?;
    configure(&file, baud_rate)?;
    let writer = file
        .try_clone()
        .with_context(|| format!("failed to clone handle for {}", path.display()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handle = stop.clone();
    let reader = TtyReader { file, stop };
    Ok((reader, writer, move || stop_handle.store(true, Ordering::SeqCst)))
}

#[cfg(target_os = "linux")]
fn configure(file: &File, baud_rate: u32) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let speed = baud_constant(baud_rate)?;
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is an open descriptor owned by `file` for the duration of
    // these calls, and `tio` is fully initialized by tcgetattr before use.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error()).context("tcgetattr");
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 1;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error()).context("cfsetspeed");
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error()).context("tcsetattr");
        }
        libc::tcflush(fd, libc::TCIOFLUSH);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn configure(_file: &File, baud_rate: u32) -> Result<()> {
    log::warn!(
        "serial line settings are not configured on this platform; assuming {} baud",
        baud_rate
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn baud_constant(baud_rate: u32) -> Result<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => return Err(anyhow!("unsupported baud rate {}", other)),
    };
    Ok(speed)
}

#[cfg(not(target_os = "linux"))]
#[allow(dead_code)]
fn baud_constant(baud_rate: u32) -> Result<u32> {
    Err(anyhow!("unsupported baud rate {}", baud_rate))
}
