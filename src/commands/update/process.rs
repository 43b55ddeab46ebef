use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::plan::UpdateStep;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
// Grandchildren (dpkg, apt methods) can hold the pipes open past the parent's exit.
const PIPE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
    pub elapsed: Duration,
}

pub fn run_bounded(step: &UpdateStep, deadline: Instant) -> Result<StepOutcome> {
    let started = Instant::now();

    let mut child = Command::new(&step.program)
        .args(&step.args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to execute {}", step.command_line()))?;

    let (sender, receiver) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, sender.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, sender.clone());
    }
    drop(sender);

    let mut output = String::new();
    let mut pipes_open = true;
    let mut exit_code = None;
    let mut exited_at: Option<Instant> = None;

    loop {
        if pipes_open {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(line) => output.push_str(&line),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => pipes_open = false,
            }
        } else if exited_at.is_none() {
            thread::sleep(POLL_INTERVAL);
        }

        if exited_at.is_none() {
            let status = child
                .try_wait()
                .with_context(|| format!("failed to poll {}", step.command_line()))?;
            if let Some(status) = status {
                exit_code = status.code();
                exited_at = Some(Instant::now());
            }
        }

        match exited_at {
            Some(at) if !pipes_open || at.elapsed() >= PIPE_GRACE => break,
            Some(_) => continue,
            None => {}
        }

        if Instant::now() >= deadline {
            warn!(
                command = %step.command_line(),
                pid = child.id(),
                "deadline reached; killing process group"
            );
            kill_process_group(&mut child);
            drain(&receiver, &mut output);
            return Ok(StepOutcome {
                exit_code: None,
                timed_out: true,
                output,
                elapsed: started.elapsed(),
            });
        }
    }

    debug!(command = %step.command_line(), exit_code = ?exit_code, "step finished");
    Ok(StepOutcome {
        exit_code,
        timed_out: false,
        output,
        elapsed: started.elapsed(),
    })
}

fn spawn_line_reader<R>(source: R, sender: Sender<String>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let mut line = String::from_utf8_lossy(&buf).into_owned();
                    if !line.ends_with('\n') {
                        line.push('\n');
                    }
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn kill_process_group(child: &mut Child) {
    let Ok(pgid) = i32::try_from(child.id()) else {
        let _ = child.kill();
        let _ = child.wait();
        return;
    };

    // SAFETY: plain syscall on a process group this process created.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn drain(receiver: &mpsc::Receiver<String>, output: &mut String) {
    let until = Instant::now() + PIPE_GRACE;
    while let Ok(line) = receiver.recv_timeout(until.saturating_duration_since(Instant::now())) {
        output.push_str(&line);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::run_bounded;
    use crate::commands::update::plan::UpdateStep;

    fn shell(script: &str) -> UpdateStep {
        UpdateStep::new("test", "sh", &["-c", script])
    }

    #[test]
    fn captures_stdout_and_stderr_with_exit_code() {
        let step = shell("echo out; echo err 1>&2; exit 3");
        let outcome =
            run_bounded(&step, Instant::now() + Duration::from_secs(30)).expect("step runs");

        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        assert!(outcome.output.contains("out\n"));
        assert!(outcome.output.contains("err\n"));
    }

    #[test]
    fn unterminated_last_line_gets_a_newline() {
        let step = shell("printf 'no newline'");
        let outcome =
            run_bounded(&step, Instant::now() + Duration::from_secs(30)).expect("step runs");
        assert_eq!(outcome.output, "no newline\n");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[test]
    fn deadline_kills_the_whole_group() {
        let step = shell("echo started; sleep 30 & sleep 30; echo never");
        let started = Instant::now();
        let outcome =
            run_bounded(&step, Instant::now() + Duration::from_secs(1)).expect("step runs");

        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());
        assert!(outcome.output.contains("started"));
        assert!(!outcome.output.contains("never"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let step = UpdateStep::new("missing", "/nonexistent/security-tool", &[]);
        assert!(run_bounded(&step, Instant::now() + Duration::from_secs(5)).is_err());
    }
}
