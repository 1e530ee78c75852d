use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{classify_extractor_failure, BotError};
use crate::sources::models::RawInfo;

/// Output container for every delivered song.
pub const AUDIO_FORMAT: &str = "mp3";
/// Fixed high-quality preset handed to the extractor's post-processor.
pub const AUDIO_QUALITY: &str = "320K";

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(?P<size>\S+))?(?:\s+at\s+(?P<speed>\S+))?",
    )
    .expect("valid regex")
});

/// One parsed progress report from the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchProgress {
    pub percent: f32,
    pub total_size: Option<String>,
    pub speed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    /// Output path containing the `%(ext)s` placeholder.
    pub output_template: &'a Path,
    pub cookies: Option<&'a Path>,
    pub timeout: Duration,
}

/// Blocking interface to the external extraction tool. Implementations are
/// only ever called from the blocking pool.
pub trait MediaExtractor: Send + Sync {
    /// Dump metadata for a URL or a `ytsearch1:` query without downloading.
    fn probe(&self, target: &str, cookies: Option<&Path>, timeout: Duration)
        -> Result<RawInfo, BotError>;

    /// Download and transcode one track, reporting progress as it goes.
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        on_progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<(), BotError>;
}

/// `yt-dlp` driven through its command line.
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn command(&self, cookies: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-warnings").arg("--no-playlist");
        if let Some(path) = cookies {
            cmd.arg("--cookies").arg(path);
        }
        cmd
    }
}

impl MediaExtractor for YtDlp {
    fn probe(
        &self,
        target: &str,
        cookies: Option<&Path>,
        timeout: Duration,
    ) -> Result<RawInfo, BotError> {
        let mut cmd = self.command(cookies);
        cmd.args(["--dump-single-json", "--flat-playlist", target]);

        let mut stdout = String::new();
        let outcome = run_with_deadline(cmd, timeout, |line| {
            stdout.push_str(line);
            stdout.push('\n');
        })?;
        if !outcome.status.success() {
            return Err(match classify_extractor_failure(&outcome.stderr) {
                BotError::Pipeline(detail) => BotError::Resolution(detail),
                other => other,
            });
        }
        serde_json::from_str(&stdout)
            .map_err(|e| BotError::Resolution(format!("unreadable extractor output: {e}")))
    }

    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        on_progress: &mut dyn FnMut(FetchProgress),
    ) -> Result<(), BotError> {
        let mut cmd = self.command(request.cookies);
        cmd.args([
            "--newline",
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            AUDIO_FORMAT,
            "--audio-quality",
            AUDIO_QUALITY,
            "--write-thumbnail",
            "--convert-thumbnails",
            "jpg",
            "-o",
        ]);
        cmd.arg(request.output_template).arg(request.url);

        debug!(url = request.url, "starting extractor download");
        let outcome = run_with_deadline(cmd, request.timeout, |line| {
            if let Some(progress) = parse_progress(line) {
                on_progress(progress);
            }
        })?;

        if outcome.status.success() {
            Ok(())
        } else {
            Err(classify_extractor_failure(&outcome.stderr))
        }
    }
}

/// Parse a `[download]  42.0% of 3.50MiB at 1.20MiB/s ETA 00:02` line.
pub fn parse_progress(line: &str) -> Option<FetchProgress> {
    let caps = PROGRESS_LINE.captures(line.trim())?;
    let percent = caps.name("pct")?.as_str().parse::<f32>().ok()?;
    Some(FetchProgress {
        percent: percent.clamp(0.0, 100.0),
        total_size: caps.name("size").map(|m| m.as_str().to_string()),
        speed: caps
            .name("speed")
            .map(|m| m.as_str().to_string())
            .filter(|s| s != "Unknown"),
    })
}

struct CommandOutcome {
    status: ExitStatus,
    stderr: String,
}

/// Run a command, streaming stdout lines to `on_line`, and kill it once the
/// deadline passes.
fn run_with_deadline(
    mut cmd: Command,
    timeout: Duration,
    mut on_line: impl FnMut(&str),
) -> Result<CommandOutcome, BotError> {
    let deadline = Instant::now() + timeout;
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BotError::Pipeline(format!("failed to spawn extractor: {e}")))?;

    let (line_tx, line_rx) = mpsc::channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            kill(&mut child);
            return Err(BotError::DownloadTimedOut(timeout));
        }
        match line_rx.recv_timeout(remaining) {
            Ok(line) => on_line(&line),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child);
                return Err(BotError::DownloadTimedOut(timeout));
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(BotError::Io(e)),
        }
    };

    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    Ok(CommandOutcome { status, stderr })
}

fn kill(child: &mut Child) {
    warn!(pid = child.id(), "extractor exceeded its deadline, killing it");
    let _ = child.kill();
    let _ = child.wait();
}

/// Check that a helper binary answers `--version`/`-version`.
pub fn tool_available(binary: &Path, version_flag: &str) -> bool {
    Command::new(binary)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Log whether the extractor and ffmpeg are installed. Missing tools are not
/// fatal at startup; requests fail individually instead.
pub fn log_tool_availability(extractor: &Path) {
    if !tool_available(extractor, "--version") {
        warn!(binary = %extractor.display(), "extractor not found; downloads will fail");
    }
    if !tool_available(Path::new("ffmpeg"), "-version") {
        warn!("ffmpeg not found; audio extraction will fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_full_line() {
        let p = parse_progress("[download]  42.3% of    3.52MiB at    1.21MiB/s ETA 00:02").unwrap();
        assert_eq!(p.percent, 42.3);
        assert_eq!(p.total_size.as_deref(), Some("3.52MiB"));
        assert_eq!(p.speed.as_deref(), Some("1.21MiB/s"));
    }

    #[test]
    fn test_parse_progress_estimated_size() {
        let p = parse_progress("[download]   5.0% of ~  10.00MiB at  Unknown B/s ETA Unknown").unwrap();
        assert_eq!(p.percent, 5.0);
        assert_eq!(p.total_size.as_deref(), Some("10.00MiB"));
    }

    #[test]
    fn test_parse_progress_done_line() {
        let p = parse_progress("[download] 100% of 3.52MiB in 00:00:03 at 1.10MiB/s").unwrap();
        assert_eq!(p.percent, 100.0);
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert_eq!(parse_progress("[youtube] dQw4w9WgXcQ: Downloading webpage"), None);
        assert_eq!(parse_progress("[download] Destination: data/x.webm"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_deadline_collects_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two; echo oops >&2; exit 3"]);
        let mut lines = Vec::new();
        let outcome =
            run_with_deadline(cmd, Duration::from_secs(10), |l| lines.push(l.to_string())).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(outcome.status.code(), Some(3));
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_deadline_kills_hung_process() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 30"]);
        let started = Instant::now();
        let result = run_with_deadline(cmd, Duration::from_millis(300), |_| {});
        assert!(matches!(result, Err(BotError::DownloadTimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let extractor = YtDlp::new("/nonexistent/yt-dlp-binary");
        let err = extractor
            .probe("ytsearch1:anything", None, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, BotError::Pipeline(_)));
        assert!(!tool_available(Path::new("/nonexistent/yt-dlp-binary"), "--version"));
    }
}
