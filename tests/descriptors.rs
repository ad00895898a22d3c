//! Counts the control process's descriptors, so it runs alone in its own test binary.

use pipesh::env::ShellState;
use pipesh::{Interpreter, PassiveSignals};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

fn shell() -> Interpreter {
    let mut state = ShellState::new();
    if state.get_var("PATH").is_none() {
        state
            .vars
            .insert("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into());
    }
    Interpreter::with_state(state, Box::new(PassiveSignals))
}

#[test]
fn chains_leave_no_descriptors_behind() {
    let dir = std::env::temp_dir().join(format!("descriptor_tests_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    let out = dir.join("out.txt");
    let mut sh = shell();
    let lines = [
        format!("echo x | cat | cat | cat > {}", out.display()),
        format!("nope-xyz | cat | cat > {}", out.display()),
        format!("echo y | cat > {} &", out.display()),
        format!("help | cat > {}", out.display()),
        format!("pwd > {}", out.display()),
        format!("echo z > {}/missing/out.txt", dir.display()),
    ];

    let before = open_descriptors();
    for _ in 0..3 {
        for line in &lines {
            sh.execute_line(line);
        }
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while sh.supervisor().background_count() > 0 {
        assert!(Instant::now() < deadline, "background children never finished");
        sh.supervisor().reap_background();
        thread::sleep(Duration::from_millis(20));
    }
    let after = open_descriptors();

    assert_eq!(before, after);
    assert!(fs::read_to_string(&out).unwrap().starts_with("x\n"));
    let _ = fs::remove_dir_all(dir);
}
