mod common;

use procbox::{ProcessState, Subprocess};
use serial_test::serial;
use tempfile::TempDir;

#[test]
#[serial]
fn timeout_kills_an_overrunning_child() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/sleep", "10"]).expect("create");
    p.set_time_limit(1);
    p.run().expect("run");

    // The code is the watchdog's kill signal, not the child's exit code.
    assert_eq!(p.wait().expect("wait"), libc::SIGKILL);
    assert_eq!(p.poll(), ProcessState::Timeout);
}

#[test]
#[serial]
fn child_finishing_within_the_limit_is_untouched() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/sleep", "1"]).expect("create");
    p.set_time_limit(5);
    p.run().expect("run");
    assert_eq!(p.wait().expect("wait"), 0);
    assert_eq!(p.poll(), ProcessState::Terminated);
}

#[test]
#[serial]
fn no_timeout_means_no_watchdog() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/sleep", "1"]).expect("create");
    p.run().expect("run");
    assert_eq!(p.wait().expect("wait"), 0);
    assert_eq!(p.poll(), ProcessState::Terminated);
}

#[test]
#[serial]
fn file_size_ceiling_classifies_as_fsize_exceeded() {
    common::setup();
    let dir = TempDir::new().expect("tempdir");
    let target = dir.path().join("flood");
    let script = format!("exec yes x > {}", target.display());

    let mut p = Subprocess::new(&["/bin/sh", "-c", &script]).expect("create");
    p.set_fsize_limit(4096);
    p.run().expect("run");

    assert_eq!(p.wait().expect("wait"), libc::SIGXFSZ);
    assert_eq!(p.poll(), ProcessState::FileSizeExceeded);

    let written = std::fs::metadata(&target).expect("limit file").len();
    assert!(written <= 4096, "file grew past the ceiling: {}", written);
}

#[test]
#[serial]
fn fd_ceiling_denies_further_opens() {
    common::setup();
    // Only stdin/stdout/stderr fit under the ceiling, so the child cannot
    // open anything and fails on its own.
    let mut p = Subprocess::new(&["/bin/cat", "/dev/null"]).expect("create");
    p.set_fd_limit(3);
    p.run().expect("run");
    let code = p.wait().expect("wait");
    assert_eq!(p.poll(), ProcessState::Terminated);
    assert_ne!(code, 0, "open beyond the fd ceiling should have failed");
}

#[test]
#[serial]
fn generous_ceilings_leave_a_well_behaved_child_alone() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/echo", "ok"]).expect("create");
    p.set_memory_limit(512 * 1024 * 1024);
    p.set_fsize_limit(64 * 1024 * 1024);
    p.set_fd_limit(64);
    p.set_proc_limit(4096);
    p.run().expect("run");
    assert_eq!(p.wait().expect("wait"), 0);
    assert_eq!(p.poll(), ProcessState::Terminated);
    assert_eq!(p.read_stdout(), b"ok\n");
}

#[test]
#[serial]
fn limit_getters_echo_the_setters() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/true"]).expect("create");
    p.set_time_limit(7);
    p.set_memory_limit(1 << 20);
    p.set_fsize_limit(1 << 16);
    p.set_fd_limit(32);
    p.set_proc_limit(8);
    assert_eq!(p.time_limit(), 7);
    assert_eq!(p.memory_limit(), 1 << 20);
    assert_eq!(p.fsize_limit(), 1 << 16);
    assert_eq!(p.fd_limit(), 32);
    assert_eq!(p.proc_limit(), 8);
}
