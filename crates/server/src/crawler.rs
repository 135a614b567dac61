// crates/server/src/crawler.rs
//! Runs the external tweet-harvest scraper as a child process.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvest_server_jobs::{CrawlOperation, CrawlOutcome, CrawlRequest, CrawlTarget, JobId, ProgressReporter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::results::{validate_filename, ArtifactFormat, ArtifactSnapshot, ResultStore};

/// [`CrawlOperation`] backed by a configured program (by default
/// `npx --yes tweet-harvest@latest`). The request travels as environment
/// variables; the artifact lands in the result store's directory.
pub struct CommandCrawler {
    program: String,
    args: Vec<String>,
    store: ResultStore,
    /// Artifact versions (name, mtime) already attributed to a job.
    claimed: Mutex<HashSet<(String, DateTime<Utc>)>>,
}

impl CommandCrawler {
    pub fn new(program: impl Into<String>, args: Vec<String>, store: ResultStore) -> Self {
        Self {
            program: program.into(),
            args,
            store,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Decide which artifact this run produced.
    ///
    /// A filename the scraper printed wins. Otherwise the artifacts that
    /// changed during the run are considered, minus those claimed by other
    /// jobs; exactly one candidate is required. Concurrent runs writing at
    /// the same time leave `outputFile` unset rather than guess.
    async fn attribute_artifact(
        &self,
        job_id: JobId,
        reported: Option<String>,
        before: &ArtifactSnapshot,
    ) -> Option<String> {
        let changed = match self.store.changed_since(before).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not list artifacts after crawl");
                return None;
            }
        };

        let mut claimed = self.claimed();
        let chosen = match reported.and_then(|name| changed.iter().find(|f| f.filename == name)) {
            Some(file) => Some(file),
            None => {
                let mut candidates = changed
                    .iter()
                    .filter(|f| !claimed.contains(&(f.filename.clone(), f.modified_at)));
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => Some(only),
                    (None, _) => None,
                    (Some(_), Some(_)) => {
                        tracing::warn!(job_id = %job_id, "Several new artifacts; leaving outputFile unset");
                        None
                    }
                }
            }
        };
        let file = chosen?;
        claimed.insert((file.filename.clone(), file.modified_at));
        Some(file.filename.clone())
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<(String, DateTime<Utc>)>> {
        self.claimed.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on claimed artifacts: {e}");
            e.into_inner()
        })
    }
}

#[async_trait]
impl CrawlOperation for CommandCrawler {
    async fn crawl(
        &self,
        request: CrawlRequest,
        progress: ProgressReporter,
    ) -> anyhow::Result<CrawlOutcome> {
        let job_id = progress.job_id();
        let data_dir = self.store.dir();
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        let before = self
            .store
            .snapshot()
            .await
            .context("failed to list existing artifacts")?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(crawl_env(&request, data_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // The scraper writes into ./tweets-data relative to its working dir.
        if let Some(parent) = data_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            cmd.current_dir(parent);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start crawler `{}`", self.program))?;
        tracing::debug!(job_id = %job_id, program = %self.program, "Crawler process spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            let mut last_count = None;
            let mut reported = None;
            if let Some(out) = stdout {
                let mut reader = BufReader::new(out);
                while let Some(line) = next_line_lossy(&mut reader, job_id).await {
                    tracing::debug!(job_id = %job_id, "crawler: {line}");
                    if let Some(n) = parse_tweet_count(&line) {
                        progress.report(n);
                        last_count = Some(n);
                    }
                    if let Some(name) = reported_artifact(&line) {
                        reported = Some(name);
                    }
                }
            }
            (last_count, reported)
        };
        let read_stderr = async {
            let mut last_line = None;
            if let Some(err) = stderr {
                let mut reader = BufReader::new(err);
                while let Some(line) = next_line_lossy(&mut reader, job_id).await {
                    tracing::debug!(job_id = %job_id, "crawler stderr: {line}");
                    if !line.trim().is_empty() {
                        last_line = Some(line.trim().to_string());
                    }
                }
            }
            last_line
        };

        let ((tweet_count, reported), last_stderr, status) =
            tokio::join!(read_stdout, read_stderr, child.wait());
        let status = status.context("failed waiting for crawler")?;

        if !status.success() {
            match last_stderr {
                Some(line) => bail!(line),
                None => bail!("crawler exited with {status}"),
            }
        }

        let output_file = self.attribute_artifact(job_id, reported, &before).await;
        Ok(CrawlOutcome {
            output_file,
            tweet_count,
        })
    }
}

/// Next line with invalid UTF-8 replaced, so one odd byte never stops the
/// drain (a closed pipe would kill the scraper). `None` at EOF or on a read
/// error.
async fn next_line_lossy<R>(reader: &mut R, job_id: JobId) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(&buf);
            Some(line.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed reading crawler output");
            None
        }
    }
}

/// Artifact filename mentioned in a scraper log line, e.g.
/// `Your tweets saved to: tweets-data/rust.csv`.
fn reported_artifact(line: &str) -> Option<String> {
    line.split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | ';' | ':' | '.' | '(' | ')')))
        .filter_map(|word| Path::new(word).file_name()?.to_str())
        .filter(|name| ArtifactFormat::from_filename(name).is_some() && validate_filename(name).is_ok())
        .last()
        .map(str::to_string)
}

/// Environment handed to the scraper process.
fn crawl_env(request: &CrawlRequest, data_dir: &Path) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("ACCESS_TOKEN", request.access_token.clone()),
        ("TARGET_TWEET_COUNT", request.target_count.to_string()),
        ("DELAY_EACH_TWEET_SECONDS", request.delay_each_tweet_secs.to_string()),
        ("DELAY_EVERY_100_TWEETS_SECONDS", request.delay_every_100_secs.to_string()),
        ("SEARCH_TAB", request.search_tab.as_str().to_string()),
        ("EXPORT_FORMAT", request.export_format.as_str().to_string()),
        ("OUTPUT_DIR", data_dir.display().to_string()),
    ];
    match &request.target {
        CrawlTarget::Search {
            keywords,
            from_date,
            to_date,
        } => {
            env.push(("SEARCH_KEYWORDS", keywords.clone()));
            if let Some(from) = from_date {
                env.push(("SEARCH_FROM_DATE", from.clone()));
            }
            if let Some(to) = to_date {
                env.push(("SEARCH_TO_DATE", to.clone()));
            }
        }
        CrawlTarget::Thread { url } => env.push(("TWEET_THREAD_URL", url.clone())),
    }
    env
}

/// Pull a running total out of a scraper log line such as
/// `Got 120 tweets so far`: the first integer directly followed by a word
/// starting with "tweet".
fn parse_tweet_count(line: &str) -> Option<u64> {
    let words: Vec<&str> = line.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        let next = pair[1].to_ascii_lowercase();
        if next.starts_with("tweet") {
            pair[0].trim_matches(|c: char| !c.is_ascii_digit()).parse().ok()
        } else {
            None
        }
    })
}
