mod common;

use procbox::{ProcessState, Subprocess};
use serial_test::serial;

#[test]
#[serial]
fn denied_syscall_kills_the_child_before_it_completes() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/echo", "should never appear"]).expect("create");
    p.disable_syscall(libc::SYS_write as i64);
    p.run().expect("run");

    assert_eq!(p.wait().expect("wait"), libc::SIGKILL);
    assert_eq!(p.poll(), ProcessState::DeniedSyscall);
    // The denied call was vetoed on entry, so nothing reached the pipe.
    assert_eq!(p.read_stdout(), b"");
}

#[test]
#[serial]
fn duplicate_denials_are_harmless() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/echo", "quiet"]).expect("create");
    p.disable_syscall(libc::SYS_write as i64);
    p.disable_syscall(libc::SYS_write as i64);
    p.run().expect("run");
    assert_eq!(p.wait().expect("wait"), libc::SIGKILL);
    assert_eq!(p.poll(), ProcessState::DeniedSyscall);
}

#[test]
#[serial]
fn unused_denial_does_not_disturb_the_child() {
    common::setup();
    // sleep never forks; the filter steps it all the way to a normal exit.
    let mut p = Subprocess::new(&["/bin/sleep", "1"]).expect("create");
    p.disable_syscall(libc::SYS_fork as i64);
    p.run().expect("run");
    assert_eq!(p.wait().expect("wait"), 0);
    assert_eq!(p.poll(), ProcessState::Terminated);
}

#[test]
#[serial]
fn timeout_beats_a_never_reached_denial() {
    common::setup();
    // First writer wins: the watchdog fires before the child ever invokes
    // the denied call, so the verdict is Timeout, not DeniedSyscall.
    let mut p = Subprocess::new(&["/bin/sleep", "10"]).expect("create");
    p.set_time_limit(1);
    p.disable_syscall(libc::SYS_write as i64);
    p.run().expect("run");

    assert_eq!(p.wait().expect("wait"), libc::SIGKILL);
    assert_eq!(p.poll(), ProcessState::Timeout);
}

#[test]
#[serial]
fn denial_beats_a_longer_timeout() {
    common::setup();
    let mut p = Subprocess::new(&["/bin/echo", "quiet"]).expect("create");
    p.set_time_limit(10);
    p.disable_syscall(libc::SYS_write as i64);
    p.run().expect("run");

    assert_eq!(p.wait().expect("wait"), libc::SIGKILL);
    assert_eq!(p.poll(), ProcessState::DeniedSyscall);
}
