//! Running external tools (`dpkg-deb`, `dpkg-sig`, `gpg`, `apt-cache`).

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `cmd` to completion and return its stdout.
///
/// `stdin`, when given, is written to the child's standard input. The child
/// is killed if it outlives `timeout`.
///
/// # Errors
///
/// Fails if the tool is not installed, exits non-zero (the error carries its
/// stderr), or times out.
pub async fn run(
    mut cmd: Command,
    name: &str,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Vec<u8>> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    if which::which(cmd.as_std().get_program()).is_err() {
        bail!("'{name}' not found in PATH; install it or configure its location");
    }

    tracing::debug!("running {name}: {cmd:?}");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {name}"))?;

    let input = stdin.unwrap_or_default();
    let mut pipe = child.stdin.take();
    let feed = async move {
        if let Some(pipe) = pipe.as_mut() {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        drop(pipe);
        Ok::<_, std::io::Error>(())
    };

    let (fed, output) = tokio::time::timeout(timeout, async {
        tokio::join!(feed, child.wait_with_output())
    })
    .await
    .with_context(|| format!("{name} timed out after {}s", timeout.as_secs()))?;

    let output = output.with_context(|| format!("failed to wait for {name}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{name} failed ({}): {}", output.status, stderr.trim());
    }
    fed.with_context(|| format!("failed to write to {name}"))?;
    Ok(output.stdout)
}
