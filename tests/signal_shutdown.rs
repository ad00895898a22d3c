//! Shutting the handlers down is process-wide and final, so this binary has a single test.

use nix::sys::signal::{SigHandler, Signal};
use pipesh::env::ShellState;
use pipesh::{Interpreter, SignalPolicy, UnixSignals};

#[test]
fn shutdown_puts_back_startup_dispositions() {
    let policy = UnixSignals::new();
    let before = policy.restore_defaults().unwrap();
    policy.reinstate(before.clone()).unwrap();
    assert_eq!(before.handler(Signal::SIGPIPE), Some(SigHandler::SigIgn));

    let mut sh = Interpreter::with_state(ShellState::new(), Box::new(UnixSignals::new()));
    sh.start().unwrap();
    sh.shutdown();

    let after = policy.restore_defaults().unwrap();
    policy.reinstate(after.clone()).unwrap();
    for signal in [Signal::SIGPIPE, Signal::SIGINT, Signal::SIGQUIT, Signal::SIGCHLD] {
        assert_eq!(after.handler(signal), before.handler(signal), "{signal}");
    }
}
