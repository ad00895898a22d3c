//! `> file` redirection: create if absent, always append, mode 0660.

use crate::error::{ResourceOp, ShellError};
use nix::fcntl::{FcntlArg, OFlag, fcntl, open};
use nix::libc;
use nix::NixPath;
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use std::ffi::CStr;
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::Path;

const REDIRECT_MODE: u32 = 0o660;

fn open_target<P: ?Sized + NixPath>(target: &P) -> Result<RawFd, ShellError> {
    open(
        target,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(REDIRECT_MODE),
    )
    .map_err(|e| ShellError::resource(ResourceOp::Open, e))
}

/// Opens the target for a built-in running inside the interpreter.
pub fn open_append(path: &Path) -> Result<File, ShellError> {
    let fd = open_target(path)?;
    // SAFETY: `open` just returned this descriptor and nothing else owns it.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

/// Child side: replaces standard output with the target file.
///
/// Buffered output must have been flushed before the fork.
pub fn redirect_stdout(target: &CStr) -> Result<(), ShellError> {
    let fd = open_target(target)?;
    let moved = dup2(fd, libc::STDOUT_FILENO);
    let _ = close(fd);
    moved.map_err(|e| ShellError::resource(ResourceOp::Dup, e))?;
    Ok(())
}

/// Copy of the interpreter's standard output, put back on drop.
///
/// Used by the in-process `exec` built-in, whose redirection must not outlive a failed exec.
pub struct SavedStdout {
    copy: RawFd,
}

impl SavedStdout {
    pub fn capture() -> Result<Self, ShellError> {
        let copy = fcntl(libc::STDOUT_FILENO, FcntlArg::F_DUPFD_CLOEXEC(libc::STDERR_FILENO + 1))
            .map_err(|e| ShellError::resource(ResourceOp::Dup, e))?;
        Ok(Self { copy })
    }
}

impl Drop for SavedStdout {
    fn drop(&mut self) {
        if let Err(e) = dup2(self.copy, libc::STDOUT_FILENO) {
            log::error!("can't restore standard output: {e}");
        }
        let _ = close(self.copy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn appends_instead_of_truncating() {
        let dir = std::env::temp_dir().join(format!("redirect_tests_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.txt");
        let _ = fs::remove_file(&path);

        for _ in 0..2 {
            let mut file = open_append(&path).unwrap();
            writeln!(file, "hi").unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "hi\nhi\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077 & !0o660, 0, "no access for others: {mode:o}");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_directory_is_an_open_error() {
        let err = open_append(Path::new("/definitely/not/here/out.txt")).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Resource {
                op: ResourceOp::Open,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }
}
