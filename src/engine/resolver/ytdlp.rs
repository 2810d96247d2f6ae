// yt-dlp resolver - `yt-dlp` binary or `python3 -m yt_dlp`
//
// Auto mode tries the binary first and falls back to the python module, keeping the
// first diagnosis when both fail. Only `--dump-json` is used; nothing is downloaded here.

use async_trait::async_trait;
use std::process::{Command as StdCommand, Output, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use super::diagnostics::{diagnose_error, error_context, BlockingReason};
use super::{MediaResolver, ResolvedMedia};
use crate::engine::config::{ResolverConfig, ResolverMode};
use crate::engine::credentials::Credentials;
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::Platform;
use crate::engine::transport::DESKTOP_UA;

/// One way of invoking yt-dlp
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    program: String,
    /// Arguments placed before the yt-dlp arguments (`-m yt_dlp`)
    prefix: Vec<String>,
    label: &'static str,
}

/// One failed invocation with its diagnosis
#[derive(Debug)]
struct Failure {
    reason: BlockingReason,
    error: Error,
}

impl Failure {
    fn diagnosed(reason: BlockingReason, platform: Platform, url: &str, detail: &str) -> Self {
        Self {
            reason,
            error: reason.into_error(platform, url, detail),
        }
    }

    fn from_stderr(stderr: &str, platform: Platform, url: &str) -> Self {
        let reason = diagnose_error(stderr).unwrap_or(BlockingReason::Unknown);
        Self::diagnosed(reason, platform, url, &error_context(stderr))
    }

    fn parse(platform: Platform, detail: impl Into<String>) -> Self {
        Self {
            reason: BlockingReason::Unknown,
            error: Error::parse(platform, detail),
        }
    }
}

pub struct YtDlpResolver {
    cli: Invocation,
    python: Invocation,
    mode: ResolverMode,
    timeout_seconds: u64,
    proxy: Option<String>,
    cli_available: OnceLock<bool>,
    python_available: OnceLock<bool>,
}

impl YtDlpResolver {
    pub fn new(config: &ResolverConfig, proxy: Option<String>) -> Self {
        let binary = config.binary.clone().unwrap_or_else(Self::find_ytdlp);
        let python = config.python.clone().unwrap_or_else(Self::find_python);
        Self {
            cli: Invocation {
                program: binary,
                prefix: Vec::new(),
                label: "cli",
            },
            python: Invocation {
                program: python,
                prefix: vec!["-m".to_string(), "yt_dlp".to_string()],
                label: "python",
            },
            mode: config.mode,
            timeout_seconds: config.timeout_seconds,
            proxy,
            cli_available: OnceLock::new(),
            python_available: OnceLock::new(),
        }
    }

    /// Find yt-dlp binary
    fn find_ytdlp() -> String {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp",
            "/usr/local/bin/yt-dlp",
            "/usr/bin/yt-dlp",
        ];

        for path in common_paths {
            if std::path::Path::new(path).exists() {
                return path.to_string();
            }
        }

        if let Ok(output) = StdCommand::new("which").arg("yt-dlp").output() {
            if output.status.success() {
                if let Ok(path) = String::from_utf8(output.stdout) {
                    let trimmed = path.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }

        "yt-dlp".to_string()
    }

    fn find_python() -> String {
        let candidates = ["python3", "/opt/homebrew/bin/python3", "/usr/local/bin/python3"];
        for candidate in candidates {
            if StdCommand::new(candidate)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
            {
                return candidate.to_string();
            }
        }
        "python3".to_string()
    }

    fn probe(invocation: &Invocation) -> bool {
        StdCommand::new(&invocation.program)
            .args(&invocation.prefix)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn available(&self, invocation: &Invocation) -> bool {
        let cell = if invocation.label == "cli" {
            &self.cli_available
        } else {
            &self.python_available
        };
        *cell.get_or_init(|| Self::probe(invocation))
    }

    /// Invocations to try, in order
    fn plan(&self) -> Vec<&Invocation> {
        match self.mode {
            ResolverMode::Cli => vec![&self.cli],
            ResolverMode::Python => vec![&self.python],
            ResolverMode::Auto => vec![&self.cli, &self.python],
        }
    }

    /// Build command arguments
    fn build_args(&self, url: &str, credentials: &Credentials) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-download".to_string(),
            "--socket-timeout".to_string(),
            "15".to_string(),
            "--retries".to_string(),
            "2".to_string(),
            "--user-agent".to_string(),
            credentials.user_agent().unwrap_or(DESKTOP_UA).to_string(),
        ];

        if let Some(cookie) = credentials.cookie_header() {
            args.push("--add-header".to_string());
            args.push(format!("Cookie:{}", cookie));
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }

    /// Run one invocation, killing it once `timeout_seconds` pass
    async fn capture(
        &self,
        invocation: &Invocation,
        args: &[String],
        platform: Platform,
        url: &str,
    ) -> std::result::Result<Output, Failure> {
        let child = TokioCommand::new(&invocation.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Failure {
                reason: BlockingReason::Unknown,
                error: Error::extraction(
                    platform,
                    ExtractionReason::Unsupported,
                    format!("failed to start {}: {}", invocation.program, e),
                ),
            })?;

        // dropping the timed-out future drops the child, which kills it
        match tokio::time::timeout(Duration::from_secs(self.timeout_seconds), child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Failure::diagnosed(
                BlockingReason::Unknown,
                platform,
                url,
                &format!("reading {} output: {}", invocation.label, e),
            )),
            Err(_) => Err(Failure::diagnosed(
                BlockingReason::NetworkTimeout,
                platform,
                url,
                &format!("timed out after {}s", self.timeout_seconds),
            )),
        }
    }

    async fn run(
        &self,
        invocation: &Invocation,
        platform: Platform,
        url: &str,
        credentials: &Credentials,
    ) -> std::result::Result<ResolvedMedia, Failure> {
        let mut args = invocation.prefix.clone();
        args.extend(self.build_args(url, credentials));
        debug!(platform = platform.as_str(), url, resolver = invocation.label, "running yt-dlp");

        let output = self.capture(invocation, &args, platform, url).await?;
        if !output.status.success() {
            return Err(Failure::from_stderr(&String::from_utf8_lossy(&output.stderr), platform, url));
        }

        // --dump-json prints one object per line; the first is the requested item
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| Failure::parse(platform, "resolver printed no JSON"))?;
        let media: ResolvedMedia = serde_json::from_str(line)
            .map_err(|e| Failure::parse(platform, format!("resolver JSON: {}", e)))?;
        info!(platform = platform.as_str(), url, resolver = invocation.label, "resolved");
        Ok(media)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn is_available(&self) -> bool {
        self.plan().into_iter().any(|inv| self.available(inv))
    }

    async fn resolve(
        &self,
        platform: Platform,
        page_url: &str,
        credentials: &Credentials,
    ) -> Result<ResolvedMedia> {
        let mut first_error: Option<Error> = None;

        for invocation in self.plan() {
            if !self.available(invocation) {
                debug!(resolver = invocation.label, program = %invocation.program, "not installed, skipping");
                continue;
            }
            match self.run(invocation, platform, page_url, credentials).await {
                Ok(media) => return Ok(media),
                Err(Failure { reason, error }) => {
                    warn!(
                        platform = platform.as_str(),
                        url = page_url,
                        resolver = invocation.label,
                        stage = "resolve",
                        diagnosis = reason.description(),
                        error = %error,
                        "yt-dlp failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    // another invocation hits the same wall
                    if reason.is_permanent() {
                        break;
                    }
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            Error::extraction(
                platform,
                ExtractionReason::Unsupported,
                "yt-dlp is not installed (binary or python module)",
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(mode: ResolverMode) -> YtDlpResolver {
        let config = ResolverConfig {
            mode,
            binary: Some("/nonexistent/yt-dlp".to_string()),
            python: Some("/nonexistent/python3".to_string()),
            timeout_seconds: 5,
        };
        YtDlpResolver::new(&config, Some("socks5://127.0.0.1:1080".to_string()))
    }

    #[test]
    fn test_args_carry_cookies_and_proxy() {
        let r = resolver(ResolverMode::Cli);
        let creds = Credentials::from_pairs([("auth_token", "abc")]);
        let args = r.build_args("https://x.com/a/status/1", &creds);
        assert!(args.contains(&"--dump-json".to_string()));
        assert!(args.contains(&"Cookie:auth_token=abc".to_string()));
        assert!(args.contains(&"socks5://127.0.0.1:1080".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://x.com/a/status/1"));
    }

    #[test]
    fn test_plan_order() {
        let r = resolver(ResolverMode::Auto);
        let labels: Vec<&str> = r.plan().iter().map(|i| i.label).collect();
        assert_eq!(labels, vec!["cli", "python"]);
        assert_eq!(resolver(ResolverMode::Python).plan().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_is_unsupported() {
        let r = resolver(ResolverMode::Auto);
        assert!(!r.is_available());
        let err = r
            .resolve(Platform::Youtube, "https://youtu.be/dQw4w9WgXcQ", &Credentials::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::Unsupported));
    }

    #[cfg(unix)]
    fn scripted(script: &str, timeout_seconds: u64) -> YtDlpResolver {
        let config = ResolverConfig {
            mode: ResolverMode::Auto,
            binary: Some("sh".to_string()),
            python: Some("sh".to_string()),
            timeout_seconds,
        };
        let mut r = YtDlpResolver::new(&config, None);
        for invocation in [&mut r.cli, &mut r.python] {
            invocation.prefix = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        }
        r.cli_available.set(true).unwrap();
        r.python_available.set(true).unwrap();
        r
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_resolver_times_out() {
        let r = scripted("sleep 10", 1);
        let err = r
            .resolve(Platform::Youtube, "https://youtu.be/dQw4w9WgXcQ", &Credentials::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                kind: crate::engine::errors::TransportErrorKind::Timeout,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permanent_failure_skips_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs");
        let script = format!(
            "echo run >> '{}'; echo 'ERROR: [youtube] abc: Video unavailable' >&2; exit 1",
            log.display()
        );
        let err = scripted(&script, 5)
            .resolve(Platform::Youtube, "https://youtu.be/dQw4w9WgXcQ", &Credentials::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::NotFound));
        assert!(err.to_string().contains("Video unavailable"));
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_blocked_cli_falls_back_to_python() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("runs");
        let script = format!(
            "echo run >> '{}'; echo 'ERROR: Sign in to confirm you are old enough (HTTP Error 403: Forbidden)' >&2; exit 1",
            log.display()
        );
        let err = scripted(&script, 5)
            .resolve(Platform::Youtube, "https://youtu.be/dQw4w9WgXcQ", &Credentials::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::AuthRequired));
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_json_line_is_parsed() {
        let r = scripted(r#"echo '[info] extracting'; echo '{"id": "abc", "title": "Clip"}'"#, 5);
        let media = r
            .resolve(Platform::Youtube, "https://youtu.be/dQw4w9WgXcQ", &Credentials::default())
            .await
            .unwrap();
        assert_eq!(media.title.as_deref(), Some("Clip"));
    }
}
