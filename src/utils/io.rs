use std::io;
use std::os::unix::io::RawFd;

/// Writes every iovec fully. EINTR retries, EAGAIN yields and retries,
/// partial writes advance the iovec cursor in place. Any other error is
/// returned with whatever suffix of the batch unwritten.
pub fn writev_all(fd: RawFd, iov: &mut [libc::iovec]) -> io::Result<()> {
    let mut idx = 0usize;
    while idx < iov.len() {
        let cnt = (iov.len() - idx).min(libc::c_int::MAX as usize) as libc::c_int;
        let n = unsafe { libc::writev(fd, iov[idx..].as_ptr(), cnt) };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    std::thread::yield_now();
                    continue;
                }
                _ => return Err(err),
            }
        }
        let mut consumed = n as usize;
        while idx < iov.len() && consumed >= iov[idx].iov_len {
            consumed -= iov[idx].iov_len;
            idx += 1;
        }
        if idx < iov.len() && consumed > 0 {
            iov[idx].iov_base = unsafe { (iov[idx].iov_base as *mut u8).add(consumed) } as *mut _;
            iov[idx].iov_len -= consumed;
        }
    }
    Ok(())
}
