//! Helpers shared by tests that drive real subprocesses.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Command,
    thread,
    time::Duration,
};

/// Write an executable `sh` script named `name` into `dir`.
pub(crate) fn fake_program(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    // A concurrent fork may still hold the write descriptor.
    for _ in 0..100 {
        match Command::new(&path).arg("--version").spawn() {
            Ok(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
                return path;
            }
            Err(err) if err.raw_os_error() == Some(libc::ETXTBSY) => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("cannot run {}: {err}", path.display()),
        }
    }
    panic!("{} stayed busy", path.display());
}
