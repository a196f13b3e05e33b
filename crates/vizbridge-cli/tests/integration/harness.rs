//! Test harness: a scripted visualization host behind a real bridge listener.
//!
//! The host "language" is one statement per line or `;`:
//! `name = 42`, `print name`, `add source`, `remove source`, `fail message`.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use vizbridge_client::{Dispatcher, Session, SessionConfig};
use vizbridge_history::Snapshot;
use vizbridge_host::{
    BridgeServer, Fault, HostState, ListenConfig, OutputCapture, RenderedImage, RequestHandler,
    ScriptRuntime,
};
use vizbridge_protocol::{Message, MAX_FRAME_BYTES};

pub const TOKEN: &str = "integration-token";

pub type Pipeline = Arc<Mutex<BTreeSet<String>>>;

pub struct ScriptedRuntime {
    pipeline: Pipeline,
}

impl ScriptRuntime for ScriptedRuntime {
    type Environment = HashMap<String, i64>;

    fn is_ready(&self) -> bool {
        true
    }

    fn new_environment(&mut self) -> Result<Self::Environment, Fault> {
        Ok(HashMap::new())
    }

    fn run(
        &mut self,
        env: &mut Self::Environment,
        code: &str,
        output: &mut OutputCapture,
    ) -> Result<(), Fault> {
        for stmt in code.split([';', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
            let mut pipeline = self.pipeline.lock().unwrap();
            if let Some(name) = stmt.strip_prefix("print ") {
                let Some(value) = env.get(name.trim()) else {
                    return Err(Fault::new(format!("NameError: {}", name.trim()))
                        .with_trace(format!("Traceback:\n  {stmt}")));
                };
                let _ = writeln!(output.stdout, "{value}");
            } else if let Some(source) = stmt.strip_prefix("add ") {
                pipeline.insert(source.trim().to_string());
            } else if let Some(source) = stmt.strip_prefix("remove ") {
                pipeline.remove(source.trim());
            } else if let Some(message) = stmt.strip_prefix("fail ") {
                return Err(Fault::new(message.trim()).with_trace("Traceback: fail"));
            } else if let Some((name, value)) = stmt.split_once('=') {
                let value = value
                    .trim()
                    .parse()
                    .map_err(|_| Fault::new(format!("SyntaxError: {stmt}")))?;
                env.insert(name.trim().to_string(), value);
            } else {
                return Err(Fault::new(format!("SyntaxError: {stmt}")));
            }
        }
        Ok(())
    }
}

pub struct ScriptedState {
    pipeline: Pipeline,
}

impl HostState for ScriptedState {
    fn snapshot(&mut self) -> Result<Snapshot, Fault> {
        let sources: Vec<String> = self.pipeline.lock().unwrap().iter().cloned().collect();
        Ok(Snapshot::new(sources.join("\n")))
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<(), Fault> {
        let text = String::from_utf8_lossy(snapshot.as_bytes()).to_string();
        let mut pipeline = self.pipeline.lock().unwrap();
        pipeline.clear();
        pipeline.extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
        Ok(())
    }

    fn inspect(&mut self) -> Result<Message, Fault> {
        let sources: Vec<String> = self.pipeline.lock().unwrap().iter().cloned().collect();
        Ok(json!({ "sources": sources }).as_object().cloned().unwrap_or_default())
    }

    fn render(&mut self, width: u32, height: u32) -> Result<RenderedImage, Fault> {
        Ok(RenderedImage {
            format: "png".into(),
            bytes: vec![0x89, b'P', b'N', b'G', (width % 256) as u8, (height % 256) as u8],
        })
    }
}

/// A bridge listening on an ephemeral loopback port.
pub struct TestBridge {
    pub addr: SocketAddr,
    pub pipeline: Pipeline,
    shutdown_tx: broadcast::Sender<()>,
}

#[allow(dead_code)]
impl TestBridge {
    pub async fn start() -> Self {
        let config = ListenConfig {
            host: "127.0.0.1".into(),
            port: 0,
            auth_token: TOKEN.into(),
            max_frame_bytes: MAX_FRAME_BYTES,
        };
        let server = BridgeServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let pipeline: Pipeline = Arc::default();
        let handler = RequestHandler::new(
            ScriptedRuntime {
                pipeline: pipeline.clone(),
            },
            ScriptedState {
                pipeline: pipeline.clone(),
            },
            TOKEN,
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(handler, shutdown_rx));

        Self {
            addr,
            pipeline,
            shutdown_tx,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            auth_token: Some(TOKEN.into()),
            timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::new(Session::new(self.session_config())))
    }

    pub fn sources(&self) -> Vec<String> {
        self.pipeline.lock().unwrap().iter().cloned().collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
