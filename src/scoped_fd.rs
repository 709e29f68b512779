use nix::errno::Errno;
use nix::fcntl::open;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{close, fsync, write};
use nix::NixPath;
use std::io;
use std::os::unix::io::RawFd;

fn os_error(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

// We DON'T want this to be Copy or Clone because of the Drop.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn open_path_with_mode<P: ?Sized + NixPath>(
        path: &P,
        oflag: OFlag,
        mode: Mode,
    ) -> io::Result<ScopedFd> {
        let fd = open(path, oflag, mode).map_err(os_error)?;
        Ok(ScopedFd { fd })
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            // We swallow any error on close
            let _ = close(self.fd);
        }

        self.fd = -1;
    }

    /// Writes all of `buf`, retrying short writes and EINTR.
    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match write(self.fd, buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => buf = &buf[n..],
                Err(Errno::EINTR) => (),
                Err(e) => return Err(os_error(e)),
            }
        }
        Ok(())
    }

    pub fn fsync(&self) -> io::Result<()> {
        fsync(self.fd).map_err(os_error)
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn write_then_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut fd = ScopedFd::open_path_with_mode(
            path.as_path(),
            OFlag::O_CLOEXEC | OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .unwrap();
        fd.write_all(b"hello ").unwrap();
        fd.write_all(b"world").unwrap();
        fd.fsync().unwrap();
        fd.close();
        fd.close();
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn errors_carry_their_errno() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ScopedFd::open_path_with_mode(
            dir.path().join("missing/dir").as_path(),
            OFlag::O_RDONLY,
            Mode::empty(),
        );
        assert_eq!(
            missing.err().and_then(|e| e.raw_os_error()),
            Some(libc::ENOENT)
        );

        let path = dir.path().join("ro");
        fs::write(&path, b"x").unwrap();
        let fd = ScopedFd::open_path_with_mode(path.as_path(), OFlag::O_RDONLY, Mode::empty())
            .unwrap();
        assert_eq!(
            fd.write_all(b"y").err().and_then(|e| e.raw_os_error()),
            Some(libc::EBADF)
        );
    }
}
