//! Test-only doubles for the generation, transport, sink and build seams.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::path::{default_file_path, project_path};
use crate::core::provider::{Provider, ProviderRequest, RequestProfile};
use crate::core::types::{GenerationResult, TokenUsage};
use crate::error::{ForgeError, Result};
use crate::io::build::{BuildOutput, BuildService};
use crate::io::dispatcher::{Generator, HttpReply, Sleeper, Transport};
use crate::io::prompt::ItemPrompt;
use crate::io::sink::{DiskSink, FileSink};
use crate::tree::{ItemKind, ItemSpec};

/// Deterministic item spec with a non-empty description.
pub fn spec(name: &str, kind: ItemKind) -> ItemSpec {
    ItemSpec {
        name: name.to_string(),
        kind,
        description: format!("{name} description"),
        summary: None,
        path: None,
    }
}

/// Root-level page prompt for `name`.
pub fn item_prompt(name: &str) -> ItemPrompt {
    ItemPrompt {
        branch: name.to_string(),
        name: name.to_string(),
        kind: ItemKind::Page.as_str(),
        description: format!("{name} description"),
        path: default_file_path(ItemKind::Page, name),
        depth: 0,
    }
}

pub fn test_profile() -> RequestProfile {
    RequestProfile::new(Provider::Anthropic, "test-model", 1024, "test-key")
        .unwrap_or_else(|err| panic!("test profile: {err}"))
}

/// Route tracing output to the test harness when `TEST_LOG` is set.
pub fn init_test_logging() {
    if std::env::var_os("TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Empty project directory on disk with a sink rooted at it.
pub fn temp_project() -> (tempfile::TempDir, DiskSink) {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let sink = DiskSink::new(dir.path());
    (dir, sink)
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<String>>),
    Fn(Responder),
}

/// Generator that answers from a queue or a closure and records every prompt.
///
/// Each call reports one input and one output token. An exhausted queue fails
/// like a dropped connection.
pub struct ScriptedGenerator {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn queued<I>(replies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            script: Script::Queue(Mutex::new(replies.into_iter().map(Into::into).collect())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Script::Fn(Box::new(respond)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _profile: &RequestProfile) -> Result<GenerationResult> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let text = match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .ok_or_else(|| ForgeError::Transport("scripted replies exhausted".to_string()))?,
            Script::Fn(respond) => respond(prompt)?,
        };
        Ok(GenerationResult {
            text,
            usage: TokenUsage::new(1, 1),
        })
    }
}

/// Transport replaying canned HTTP replies in order.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<HttpReply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<HttpReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<HttpReply> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ForgeError::Transport("connection refused".to_string()))
    }
}

/// Sleeper that returns immediately and remembers what it was asked to wait.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
    }
}

/// In-memory sink with the same collision rule as [`DiskSink`].
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemorySink {
    /// Seed a file without counting it as a write.
    pub fn insert(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), content.to_string());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let key = project_path(path).unwrap_or_else(|| path.to_string());
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if files.contains_key(&key) {
            return Err(ForgeError::PathCollision { path: key });
        }
        files.insert(key, content.to_string());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    async fn replace(&self, path: &str, content: &str) -> Result<()> {
        self.insert(path, content);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.get(path).ok_or_else(|| {
            ForgeError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not in memory sink"),
            )
        })
    }
}

/// Build service replaying queued outputs; the last one repeats.
pub struct ScriptedBuild {
    outputs: Mutex<VecDeque<BuildOutput>>,
    calls: Mutex<usize>,
}

impl ScriptedBuild {
    pub fn new(outputs: impl IntoIterator<Item = BuildOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BuildService for ScriptedBuild {
    async fn build(&self) -> Result<BuildOutput> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let mut outputs = self.outputs.lock().unwrap_or_else(PoisonError::into_inner);
        let output = if outputs.len() > 1 {
            outputs.pop_front()
        } else {
            outputs.front().cloned()
        };
        Ok(output.unwrap_or_else(BuildOutput::passed))
    }
}
