//! In-memory host used by the unit tests.
//!
//! The "language" is a handful of `;`-separated statements:
//! `name = 42`, `print name`, `eprint text`, `add source`, `fail message`.
//! `add` mutates the shared scene, which is what snapshots capture.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use serde_json::json;
use vizbridge_history::Snapshot;
use vizbridge_protocol::Message;

use crate::capabilities::{Fault, HostState, OutputCapture, RenderedImage, ScriptRuntime};

pub type Scene = Arc<Mutex<BTreeSet<String>>>;

pub fn scene() -> Scene {
    Arc::new(Mutex::new(BTreeSet::new()))
}

pub struct FakeRuntime {
    pub scene: Scene,
    pub ready: bool,
}

impl FakeRuntime {
    pub fn new(scene: Scene) -> Self {
        Self { scene, ready: true }
    }
}

impl ScriptRuntime for FakeRuntime {
    type Environment = HashMap<String, i64>;

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn new_environment(&mut self) -> Result<Self::Environment, Fault> {
        if !self.ready {
            return Err(Fault::new("interpreter is not initialized"));
        }
        Ok(HashMap::new())
    }

    fn run(
        &mut self,
        env: &mut Self::Environment,
        code: &str,
        output: &mut OutputCapture,
    ) -> Result<(), Fault> {
        for stmt in code.split([';', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
            let trace = || format!("Traceback (most recent call last):\n  statement: {stmt}");
            if let Some(name) = stmt.strip_prefix("print ") {
                let value = env.get(name.trim()).ok_or_else(|| {
                    Fault::new(format!("NameError: name '{}' is not defined", name.trim()))
                        .with_trace(trace())
                })?;
                let _ = writeln!(output.stdout, "{value}");
            } else if let Some(text) = stmt.strip_prefix("eprint ") {
                let _ = writeln!(output.stderr, "{text}");
            } else if let Some(source) = stmt.strip_prefix("add ") {
                self.scene.lock().unwrap().insert(source.trim().to_string());
            } else if let Some(message) = stmt.strip_prefix("fail ") {
                return Err(Fault::new(message.trim()).with_trace(trace()));
            } else if let Some((name, value)) = stmt.split_once('=') {
                let value: i64 = value.trim().parse().map_err(|_| {
                    Fault::new(format!("SyntaxError: bad literal '{}'", value.trim()))
                        .with_trace(trace())
                })?;
                env.insert(name.trim().to_string(), value);
            } else {
                return Err(Fault::new(format!("SyntaxError: '{stmt}'")).with_trace(trace()));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeState {
    pub scene: Scene,
    pub fail_snapshot: bool,
    pub fail_restore: bool,
    pub restores: usize,
}

impl FakeState {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            ..Self::default()
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.scene.lock().unwrap().iter().cloned().collect()
    }
}

impl HostState for FakeState {
    fn snapshot(&mut self) -> Result<Snapshot, Fault> {
        if self.fail_snapshot {
            return Err(Fault::new("state capture unavailable"));
        }
        Ok(Snapshot::new(self.sources().join("\n")))
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<(), Fault> {
        if self.fail_restore {
            return Err(Fault::new("replay failed").with_trace("Traceback: replay"));
        }
        let text = String::from_utf8_lossy(snapshot.as_bytes()).to_string();
        let mut scene = self.scene.lock().unwrap();
        scene.clear();
        scene.extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
        self.restores += 1;
        Ok(())
    }

    fn inspect(&mut self) -> Result<Message, Fault> {
        let sources = self.sources();
        let value = json!({ "count": sources.len(), "sources": sources });
        Ok(value.as_object().cloned().unwrap_or_default())
    }

    fn render(&mut self, width: u32, height: u32) -> Result<RenderedImage, Fault> {
        Ok(RenderedImage {
            format: "png".into(),
            bytes: format!("{width}x{height}").into_bytes(),
        })
    }
}
