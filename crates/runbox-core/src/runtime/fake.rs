//! Scripted in-memory runtime for exercising the pipeline without Docker.
//!
//! Every call is recorded so tests can assert exactly which runtime operations
//! an execution performed. Ids are generated per call and never reused.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{BuildEvent, ContainerRuntime, LogChunk};
use crate::config::ResourceLimits;
use crate::errors::RuntimeError;
use crate::templates::INPUT_FILE_NAME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    BuildImage {
        tag: String,
    },
    CreateContainer {
        image: String,
        name: String,
        limits: ResourceLimits,
    },
    StartContainer {
        id: String,
    },
    WaitContainer {
        id: String,
    },
    ContainerLogs {
        id: String,
    },
    RemoveContainer {
        id: String,
    },
    RemoveImage {
        image: String,
    },
}

/// How a scripted build behaves.
#[derive(Debug, Clone)]
pub enum FakeBuild {
    /// Emit the log lines, then an image id.
    Succeed { log: Vec<String> },
    /// Emit the log lines, then a build error.
    Fail { log: Vec<String>, error: String },
    /// Emit the log lines and finish without ever reporting an image id.
    NoImageId { log: Vec<String> },
    /// Emit the log lines, then never finish.
    Hang { log: Vec<String> },
    /// The runtime connection fails mid-build.
    StreamError { message: String },
}

/// How a scripted container behaves once started.
#[derive(Debug, Clone)]
pub enum FakeRun {
    /// Exit with the given code after producing the given output.
    Exit {
        code: i64,
        stdout: String,
        stderr: String,
    },
    /// Echo the workspace's input file to stdout and exit 0.
    EchoInput,
    /// Produce the given output and never exit.
    Hang {
        stdout: String,
        stderr: String,
    },
    /// Container creation fails.
    CreateError { message: String },
    /// Container creation panics.
    CreatePanic,
    /// The container is created but refuses to start.
    StartError { message: String },
}

impl FakeRun {
    pub fn exit(code: i64, stdout: &str, stderr: &str) -> Self {
        FakeRun::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    pub fn hang(stdout: &str, stderr: &str) -> Self {
        FakeRun::Hang {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// How log delivery behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeLogs {
    /// All frames are delivered and the stream ends.
    Complete,
    /// Frames are delivered but the stream never ends.
    Stall,
}

/// How removal calls behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRemovals {
    Succeed,
    Fail,
    /// The call never returns.
    Hang,
}

pub struct FakeRuntime {
    build: FakeBuild,
    run: FakeRun,
    logs: FakeLogs,
    removals: FakeRemovals,
    next_id: AtomicU64,
    calls: Mutex<Vec<RuntimeCall>>,
    inputs_by_image: Mutex<HashMap<String, String>>,
    images_by_container: Mutex<HashMap<String, String>>,
}

impl FakeRuntime {
    pub fn new(build: FakeBuild, run: FakeRun) -> Self {
        Self {
            build,
            run,
            logs: FakeLogs::Complete,
            removals: FakeRemovals::Succeed,
            next_id: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            inputs_by_image: Mutex::new(HashMap::new()),
            images_by_container: Mutex::new(HashMap::new()),
        }
    }

    /// A runtime whose programs print `stdout` and exit cleanly.
    pub fn printing(stdout: &str) -> Self {
        Self::new(
            FakeBuild::Succeed {
                log: vec!["Step 1/4 : FROM base\n".to_string()],
            },
            FakeRun::exit(0, stdout, ""),
        )
    }

    pub fn with_logs(mut self, logs: FakeLogs) -> Self {
        self.logs = logs;
        self
    }

    /// Make every removal call fail.
    pub fn with_failing_removals(self) -> Self {
        self.with_removals(FakeRemovals::Fail)
    }

    pub fn with_removals(mut self, removals: FakeRemovals) -> Self {
        self.removals = removals;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fresh_id(&self, kind: &str) -> String {
        format!("{}-{}", kind, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn output_for(&self, container_id: &str) -> (String, String) {
        match &self.run {
            FakeRun::Exit { stdout, stderr, .. } | FakeRun::Hang { stdout, stderr } => {
                (stdout.clone(), stderr.clone())
            }
            FakeRun::EchoInput => {
                let image = self
                    .images_by_container
                    .lock()
                    .unwrap()
                    .get(container_id)
                    .cloned()
                    .unwrap_or_default();
                let input = self
                    .inputs_by_image
                    .lock()
                    .unwrap()
                    .get(&image)
                    .cloned()
                    .unwrap_or_default();
                (input, String::new())
            }
            FakeRun::CreateError { .. }
            | FakeRun::CreatePanic
            | FakeRun::StartError { .. } => (String::new(), String::new()),
        }
    }
}

fn read_input_file(context: &[u8]) -> Option<String> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(context));
    for entry in archive.entries().ok()? {
        let mut entry = entry.ok()?;
        let is_input = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n == INPUT_FILE_NAME))
            .unwrap_or(false);
        if is_input {
            let mut content = String::new();
            entry.read_to_string(&mut content).ok()?;
            return Some(content);
        }
    }
    None
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn build_image<'a>(
        &'a self,
        context: Vec<u8>,
        tag: &'a str,
    ) -> BoxStream<'a, Result<BuildEvent, RuntimeError>> {
        self.record(RuntimeCall::BuildImage { tag: tag.to_string() });
        let logs = |log: &Vec<String>| -> Vec<Result<BuildEvent, RuntimeError>> {
            log.iter().map(|line| Ok(BuildEvent::Log(line.clone()))).collect()
        };

        match &self.build {
            FakeBuild::Succeed { log } => {
                let image_id = format!("sha256:{}", self.fresh_id("image"));
                if let Some(input) = read_input_file(&context) {
                    self.inputs_by_image
                        .lock()
                        .unwrap()
                        .insert(image_id.clone(), input);
                }
                let mut events = logs(log);
                events.push(Ok(BuildEvent::ImageId(image_id)));
                stream::iter(events).boxed()
            }
            FakeBuild::Fail { log, error } => {
                let mut events = logs(log);
                events.push(Ok(BuildEvent::Error(error.clone())));
                stream::iter(events).boxed()
            }
            FakeBuild::NoImageId { log } => stream::iter(logs(log)).boxed(),
            FakeBuild::Hang { log } => stream::iter(logs(log)).chain(stream::pending()).boxed(),
            FakeBuild::StreamError { message } => {
                stream::iter(vec![Err(RuntimeError::Other(message.clone()))]).boxed()
            }
        }
    }

    async fn create_container(
        &self,
        image: &str,
        name: &str,
        limits: ResourceLimits,
    ) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::CreateContainer {
            image: image.to_string(),
            name: name.to_string(),
            limits,
        });
        match &self.run {
            FakeRun::CreateError { message } => return Err(RuntimeError::Other(message.clone())),
            FakeRun::CreatePanic => panic!("scripted panic while creating {}", name),
            _ => {}
        }
        let id = self.fresh_id("container");
        self.images_by_container
            .lock()
            .unwrap()
            .insert(id.clone(), image.to_string());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::StartContainer { id: id.to_string() });
        if let FakeRun::StartError { message } = &self.run {
            return Err(RuntimeError::Other(message.clone()));
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(RuntimeCall::WaitContainer { id: id.to_string() });
        match &self.run {
            FakeRun::Exit { code, .. } => Ok(*code),
            FakeRun::EchoInput => Ok(0),
            FakeRun::Hang { .. } => std::future::pending().await,
            FakeRun::CreateError { message } | FakeRun::StartError { message } => {
                Err(RuntimeError::Other(message.clone()))
            }
            FakeRun::CreatePanic => Err(RuntimeError::Other("never created".to_string())),
        }
    }

    fn container_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk, RuntimeError>> {
        self.record(RuntimeCall::ContainerLogs { id: id.to_string() });
        let (stdout, stderr) = self.output_for(id);
        let mut frames = Vec::new();
        if !stdout.is_empty() {
            frames.push(Ok(LogChunk::Stdout(Bytes::from(stdout))));
        }
        if !stderr.is_empty() {
            frames.push(Ok(LogChunk::Stderr(Bytes::from(stderr))));
        }
        match self.logs {
            FakeLogs::Complete => stream::iter(frames).boxed(),
            FakeLogs::Stall => stream::iter(frames).chain(stream::pending()).boxed(),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveContainer { id: id.to_string() });
        match self.removals {
            FakeRemovals::Succeed => Ok(()),
            FakeRemovals::Fail => Err(RuntimeError::Other(format!("no such container: {}", id))),
            FakeRemovals::Hang => std::future::pending().await,
        }
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveImage { image: image.to_string() });
        match self.removals {
            FakeRemovals::Succeed => Ok(()),
            FakeRemovals::Fail => Err(RuntimeError::Other(format!("no such image: {}", image))),
            FakeRemovals::Hang => std::future::pending().await,
        }
    }
}
