use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long output readers may keep going once a timed-out command is killed
const READER_GRACE: Duration = Duration::from_millis(500);

/// Keep the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `command` to completion, killing it once `timeout` (if any) has elapsed.
///
/// With a timeout on unix, the command leads its own process group and the
/// whole group is killed on timeout, so processes it spawned do not outlive it.
/// Without one it stays in the caller's group and receives terminal signals.
pub async fn run_command_with_timeout(
    command: &mut Command,
    timeout: Option<Duration>,
) -> std::io::Result<CommandRunResult> {
    #[cfg(unix)]
    if timeout.is_some() {
        command.process_group(0);
    }

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout_handle = tokio::spawn(read_all(child.stdout.take()));
    let stderr_handle = tokio::spawn(read_all(child.stderr.take()));

    let (status, timed_out) = match timeout {
        None => (Some(child.wait().await?), false),
        Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                kill_process_tree(&mut child).await;
                (child.try_wait().ok().flatten(), true)
            }
        },
    };

    // A descendant that escaped the kill can hold the pipes open forever
    let grace = timed_out.then_some(READER_GRACE);
    let stdout_bytes = join_reader(stdout_handle, grace).await;
    let stderr_bytes = join_reader(stderr_handle, grace).await;

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: plain kill(2) on the group this command leads
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

async fn join_reader(mut handle: JoinHandle<Vec<u8>>, grace: Option<Duration>) -> Vec<u8> {
    let Some(grace) = grace else {
        return handle.await.unwrap_or_default();
    };
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(bytes) => bytes.unwrap_or_default(),
        Err(_) => {
            tracing::debug!("Output reader still open {grace:?} after kill, abandoning it");
            handle.abort();
            Vec::new()
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}
