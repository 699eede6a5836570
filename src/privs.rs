use libc;
use std::ffi::CString;
use std::io;

/// Drops root privileges to the named user. Called after the listeners
/// are bound so low ports still work.
pub fn drop_privileges(username: &str) -> io::Result<()> {
    let name = CString::new(username)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "username contains a NUL byte"))?;
    unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown user {}", username),
            ));
        }
        if libc::setgid((*pw).pw_gid) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setuid((*pw).pw_uid) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    info!("dropped privileges to {}", username);
    Ok(())
}
