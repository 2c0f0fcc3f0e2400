//! Capture of the process's standard output and error
//!
//! The tunnel and forwarding engines write diagnostics straight to fds 1
//! and 2, bypassing `tracing`. Those fds are pointed at a pipe whose read end
//! is scanned line by line on a dedicated thread and fed into the
//! [`LogSink`]. The redirection is process-wide and cannot be undone.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::error::{TunwarpError, TunwarpResult};
use crate::log_sink::LogSink;

static CAPTURED: AtomicBool = AtomicBool::new(false);

/// Whether standard streams have already been captured in this process
pub fn is_captured() -> bool {
    CAPTURED.load(Ordering::SeqCst)
}

/// Redirect stdout and stderr into `sink`.
///
/// The first call returns a duplicate of the original stderr, for the host
/// only. Later calls are no-ops returning `None`.
#[cfg(unix)]
pub fn capture_stdio(sink: &LogSink) -> TunwarpResult<Option<File>> {
    use std::io::Write;

    if CAPTURED.swap(true, Ordering::SeqCst) {
        debug!("Standard streams already captured");
        return Ok(None);
    }

    let result: TunwarpResult<Option<File>> = (|| {
        let original_stderr = unix::dup_fd(libc::STDERR_FILENO)
            .map_err(|e| TunwarpError::LogCapture(format!("Failed to duplicate stderr: {}", e)))?;
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        redirect_into(sink, &[libc::STDOUT_FILENO, libc::STDERR_FILENO])?;
        Ok(Some(original_stderr))
    })();

    if result.is_err() {
        CAPTURED.store(false, Ordering::SeqCst);
    }
    result
}

#[cfg(not(unix))]
pub fn capture_stdio(_sink: &LogSink) -> TunwarpResult<Option<File>> {
    Err(TunwarpError::LogCapture(
        "Standard stream capture is only supported on Unix".to_string(),
    ))
}

/// Point every fd in `targets` at a new pipe and pump its lines into `sink`.
///
/// The reader thread exits once all redirected fds are closed.
#[cfg(unix)]
fn redirect_into(sink: &LogSink, targets: &[i32]) -> TunwarpResult<JoinHandle<()>> {
    use std::os::fd::AsRawFd;

    let (read_end, write_end) = unix::pipe()
        .map_err(|e| TunwarpError::LogCapture(format!("Failed to create pipe: {}", e)))?;

    let mut saved: Vec<(i32, File)> = Vec::with_capacity(targets.len());
    for &target in targets {
        let redirected = unix::dup_fd(target)
            .and_then(|original| unix::redirect(write_end.as_raw_fd(), target).map(|()| original));
        match redirected {
            Ok(original) => saved.push((target, original)),
            Err(err) => {
                restore(&saved);
                return Err(TunwarpError::LogCapture(format!(
                    "Failed to redirect fd {}: {}",
                    target, err
                )));
            }
        }
    }
    // The targets now hold the write side
    drop(write_end);

    let sink = sink.clone();
    let reader = File::from(read_end);
    thread::Builder::new()
        .name("stdio-capture".to_string())
        .spawn(move || pump_lines(reader, &sink))
        .map_err(|e| {
            restore(&saved);
            TunwarpError::LogCapture(format!("Failed to spawn reader thread: {}", e))
        })
}

/// Point each fd back at the file saved for it
#[cfg(unix)]
fn restore(saved: &[(i32, File)]) {
    use std::os::fd::AsRawFd;

    for (fd, original) in saved.iter().rev() {
        if let Err(e) = unix::redirect(original.as_raw_fd(), *fd) {
            error!("Failed to restore fd {}: {}", fd, e);
        }
    }
}

fn pump_lines<R: Read>(reader: R, sink: &LogSink) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let _ = sink.write(&line);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Standard stream reader failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io;
    use std::os::fd::{FromRawFd, OwnedFd};

    pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe(2) succeeded, so both fds are open and owned by us
        Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
    }

    /// Make `target` refer to the same file as `source`
    pub fn redirect(source: libc::c_int, target: libc::c_int) -> io::Result<()> {
        // SAFETY: dup2(2) only manipulates the fd table
        if unsafe { libc::dup2(source, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn dup_fd(fd: libc::c_int) -> io::Result<File> {
        // SAFETY: dup(2) on a caller-provided fd has no memory effects
        let duplicate = unsafe { libc::dup(fd) };
        if duplicate < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `duplicate` is a fresh fd owned by nobody else
        Ok(unsafe { File::from_raw_fd(duplicate) })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom, Write};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_pump_lines_splits_on_newlines() {
        let sink = LogSink::new();
        pump_lines(Cursor::new(b"one\ntwo\n\nthree".to_vec()), &sink);
        assert_eq!(sink.drain(), "one\ntwo\n\nthree");
    }

    #[test]
    fn test_redirected_fd_reaches_sink() {
        let sink = LogSink::new();
        let target = tempfile::tempfile().unwrap();

        let reader = redirect_into(&sink, &[target.as_raw_fd()]).unwrap();
        (&target).write_all(b"wireguard: handshake ok\n").unwrap();
        (&target).write_all(b"lwip: stack started\n").unwrap();

        // Closing the last write side ends the reader
        drop(target);
        reader.join().unwrap();

        assert_eq!(sink.drain(), "wireguard: handshake ok\nlwip: stack started");
    }

    #[test]
    fn test_failed_redirect_restores_earlier_targets() {
        let sink = LogSink::new();
        let mut target = tempfile::tempfile().unwrap();

        assert!(redirect_into(&sink, &[target.as_raw_fd(), -1]).is_err());

        target.write_all(b"still a file\n").unwrap();
        target.seek(SeekFrom::Start(0)).unwrap();
        let mut content = String::new();
        target.read_to_string(&mut content).unwrap();

        assert_eq!(content, "still a file\n");
        assert!(sink.is_empty());
    }
}
