use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use tracing::debug;

use crate::index::Repository;
use crate::scm::{validate_sha, CommitDetail, CommitHistory, HistoryProvider, SignatureStatus};

/// Pretty format whose output the commit-log parser consumes.
const LOG_FORMAT: &str = "--pretty=format:%H %at %s";

/// Unit/record separated format used to hydrate commits.
const DETAIL_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%ct%x1f%G?%x1f%B%x1e";

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root).args(args);
        cmd
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = self.command(args).output().with_context(|| {
            if let Err(e) = which::which("git") {
                format!("git command not found. Please install git: {e}")
            } else {
                format!("Failed to execute git command: {args:?}")
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git command failed with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("git output was not valid UTF-8")
    }

    fn commit_exists(&self, sha: &str) -> Result<bool> {
        let rev = format!("{sha}^{{commit}}");
        let output = self
            .command(&["cat-file", "-e", "--end-of-options", &rev])
            .output()
            .context("Failed to execute git cat-file")?;
        Ok(output.status.success())
    }
}

impl CommitHistory for GitRepo {
    fn commit_log(&self) -> Result<Box<dyn BufRead + Send>> {
        // `git log --all` on a repository without refs has nothing to say.
        if self.is_empty()? {
            return Ok(Box::new(io::empty()));
        }

        let stream = GitLogStream::spawn(self.command(&["log", "--all", LOG_FORMAT]))
            .with_context(|| format!("Failed to start git log in {}", self.root.display()))?;
        Ok(Box::new(stream))
    }

    fn commits_by_ids(&self, shas: &[String]) -> Result<Vec<CommitDetail>> {
        let mut seen = HashSet::with_capacity(shas.len());
        let mut present = Vec::with_capacity(shas.len());
        for sha in shas {
            validate_sha(sha)?;
            if !seen.insert(sha.as_str()) {
                continue;
            }
            if self.commit_exists(sha)? {
                present.push(sha.as_str());
            } else {
                debug!(sha = %sha, repo = %self.root.display(), "commit missing from history");
            }
        }

        if present.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["log", "--no-walk=unsorted", DETAIL_FORMAT, "--end-of-options"];
        args.extend(present);
        let output = self
            .run_git(&args)
            .context("Failed to read commit details")?;

        parse_commit_details(&output)
    }

    fn is_empty(&self) -> Result<bool> {
        let output = self
            .run_git(&["for-each-ref", "--count=1", "--format=%(refname)"])
            .with_context(|| format!("Failed to list refs in {}", self.root.display()))?;
        Ok(output.trim().is_empty())
    }
}

fn parse_commit_details(output: &str) -> Result<Vec<CommitDetail>> {
    output
        .split('\x1e')
        .map(|chunk| chunk.trim_start_matches('\n'))
        .filter(|chunk| !chunk.is_empty())
        .map(parse_commit_detail)
        .collect()
}

fn parse_commit_detail(chunk: &str) -> Result<CommitDetail> {
    let fields: Vec<&str> = chunk.splitn(6, '\x1f').collect();
    let [sha, author_name, author_email, committed, signature, message] = fields[..] else {
        bail!("Unexpected commit detail record: {chunk:?}");
    };

    let committed_unix: i64 = committed
        .parse()
        .with_context(|| format!("Invalid commit time '{committed}' for {sha}"))?;
    let committed_at = DateTime::from_timestamp(committed_unix, 0)
        .with_context(|| format!("Commit time out of range for {sha}"))?;

    let message = message.trim_end().to_string();
    let summary = message.lines().next().unwrap_or_default().to_string();

    Ok(CommitDetail {
        sha: sha.to_string(),
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        committed_at,
        summary,
        message,
        signature: SignatureStatus::from_code(signature.chars().next().unwrap_or('N')),
    })
}

/// Streaming stdout of a running git process.
///
/// End of stream is only reported once the process has exited successfully;
/// a non-zero exit turns into an I/O error carrying git's stderr. Dropping the
/// stream before the end kills the process.
pub struct GitLogStream {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl GitLogStream {
    fn spawn(mut cmd: Command) -> Result<Self> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                if let Err(e) = which::which("git") {
                    format!("git command not found. Please install git: {e}")
                } else {
                    "Failed to spawn git".to_string()
                }
            })?;

        let stdout = child.stdout.take().context("git stdout was not captured")?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr,
            finished: false,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(io::Error::other(format!(
                "git log failed with status {status}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Read for GitLogStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for GitLogStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.finished {
            return Ok(&[]);
        }
        if self.stdout.fill_buf()?.is_empty() {
            self.finish()?;
            return Ok(&[]);
        }
        self.stdout.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.stdout.consume(amt);
    }
}

impl Drop for GitLogStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Resolves repositories to on-disk git directories under a common root.
#[derive(Debug, Clone)]
pub struct GitHistoryProvider {
    repos_root: PathBuf,
}

impl GitHistoryProvider {
    #[must_use]
    pub const fn new(repos_root: PathBuf) -> Self {
        Self { repos_root }
    }

    /// `<root>/<owner>/<name>.git`, falling back to `<root>/<owner>/<name>`.
    pub fn repo_path(&self, repo: &Repository) -> Result<PathBuf> {
        validate_path_segment(&repo.owner_name)?;
        validate_path_segment(&repo.name)?;

        let owner_dir = self.repos_root.join(&repo.owner_name);
        let bare = owner_dir.join(format!("{}.git", repo.name));
        if bare.is_dir() {
            return Ok(bare);
        }
        let plain = owner_dir.join(&repo.name);
        if plain.is_dir() {
            return Ok(plain);
        }
        bail!(
            "No git storage for {} under {}",
            repo.full_name(),
            self.repos_root.display()
        )
    }
}

impl HistoryProvider for GitHistoryProvider {
    fn open(&self, repo: &Repository) -> Result<Box<dyn CommitHistory>> {
        let path = self.repo_path(repo)?;
        Ok(Box::new(GitRepo::new(path)))
    }
}

fn validate_path_segment(segment: &str) -> Result<()> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!("Invalid repository path segment: {segment:?}"),
    }
}
