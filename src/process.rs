//! Runs an external command to completion, capturing its output.

use std::path::Path;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

#[cfg(unix)]
fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        anyhow::bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(())
}

/// A pipe whose ends are not inherited by unrelated children spawned
/// concurrently from other workers.
#[cfg(unix)]
fn cloexec_pipe() -> anyhow::Result<(std::fs::File, std::os::fd::OwnedFd)> {
    use std::os::fd::FromRawFd;
    let mut fds: [libc::c_int; 2] = [0; 2];
    unsafe {
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        check_posix("pipe2", libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC))?;
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        {
            check_posix("pipe", libc::pipe(fds.as_mut_ptr()))?;
            for fd in fds {
                check_posix("fcntl", libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
            }
        }
        Ok((
            std::fs::File::from_raw_fd(fds[0]),
            std::os::fd::OwnedFd::from_raw_fd(fds[1]),
        ))
    }
}

/// Run `exe` with `args` in `cwd`, returning how it ended and everything it
/// wrote to stdout and stderr, interleaved as written.
#[cfg(unix)]
pub fn run_command(
    exe: &Path,
    args: &[String],
    cwd: &Path,
) -> anyhow::Result<(Termination, Vec<u8>)> {
    use std::io::{Read, Write};
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    // Both stdout and stderr feed the same pipe, which std::process cannot
    // set up by itself.
    let (mut pipe, write_end) = cloexec_pipe()?;
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_end.try_clone()?))
        .stderr(Stdio::from(write_end));
    let spawned = cmd.spawn();
    // The command holds our copies of the write end; the read below only
    // sees EOF once they are closed.
    drop(cmd);
    let mut child =
        spawned.map_err(|err| anyhow::anyhow!("spawn {}: {}", exe.display(), err))?;

    let mut output = Vec::new();
    pipe.read_to_end(&mut output)?;
    let status = child.wait()?;

    let mut termination = Termination::Success;
    if !status.success() {
        termination = Termination::Failure;
        if let Some(sig) = status.signal() {
            match sig {
                libc::SIGINT => {
                    write!(output, "interrupted")?;
                    termination = Termination::Interrupted;
                }
                _ => write!(output, "signal {}", sig)?,
            }
        }
    }
    Ok((termination, output))
}

#[cfg(not(unix))]
pub fn run_command(
    exe: &Path,
    args: &[String],
    cwd: &Path,
) -> anyhow::Result<(Termination, Vec<u8>)> {
    let out = std::process::Command::new(exe)
        .args(args)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|err| anyhow::anyhow!("spawn {}: {}", exe.display(), err))?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    let termination = if out.status.success() {
        Termination::Success
    } else {
        Termination::Failure
    };
    Ok((termination, output))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> anyhow::Result<(Termination, Vec<u8>)> {
        run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            Path::new("."),
        )
    }

    #[test]
    fn merges_output() -> anyhow::Result<()> {
        let (term, out) = sh("echo out; echo err >&2")?;
        assert_eq!(term, Termination::Success);
        assert_eq!(String::from_utf8_lossy(&out), "out\nerr\n");
        Ok(())
    }

    #[test]
    fn failure() -> anyhow::Result<()> {
        let (term, _) = sh("exit 3")?;
        assert_eq!(term, Termination::Failure);
        let (term, out) = sh("kill -TERM $$")?;
        assert_eq!(term, Termination::Failure);
        assert!(String::from_utf8_lossy(&out).contains("signal"));
        Ok(())
    }

    #[test]
    fn runs_in_cwd() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("marker"), "")?;
        let (term, out) = run_command(Path::new("/bin/ls"), &[], dir.path())?;
        assert_eq!(term, Termination::Success);
        assert_eq!(String::from_utf8_lossy(&out), "marker\n");
        Ok(())
    }

    #[test]
    fn missing_executable() {
        assert!(run_command(Path::new("/nonexistent/tool"), &[], Path::new(".")).is_err());
    }
}
