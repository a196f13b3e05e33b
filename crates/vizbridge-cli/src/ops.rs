//! Operations the CLI can run against the bridge.
//!
//! Each operation yields a JSON value for printing or a normalized
//! [`Failure`].

use std::path::PathBuf;

use serde_json::{json, Value};
use vizbridge_client::{Dispatcher, Failure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Ping,
    Execute { code: String },
    Inspect,
    Render { width: u32, height: u32, out: PathBuf },
    History,
    Restore { entry_id: u64 },
}

pub async fn run_operation(dispatcher: &Dispatcher, op: Operation) -> Result<Value, Failure> {
    match op {
        Operation::Ping => {
            dispatcher.ping().await?;
            let bridge = dispatcher.session().bridge_info().await;
            Ok(json!({ "ok": true, "bridge": bridge }))
        }
        Operation::Execute { code } => {
            let report = dispatcher.execute_code(&code).await?;
            Ok(to_value(&report))
        }
        Operation::Inspect => Ok(Value::Object(dispatcher.inspect_state().await?)),
        Operation::Render { width, height, out } => {
            let image = dispatcher.render_image(width, height).await?;
            std::fs::write(&out, &image.bytes).map_err(|e| {
                Failure::new("WRITE_FAILED", format!("cannot write {}: {e}", out.display()))
            })?;
            tracing::info!(path = %out.display(), bytes = image.bytes.len(), "saved rendered image");
            Ok(json!({
                "format": image.format,
                "bytes": image.bytes.len(),
                "path": out.display().to_string(),
            }))
        }
        Operation::History => {
            let records = dispatcher.history().await?;
            Ok(json!({ "history": records }))
        }
        Operation::Restore { entry_id } => {
            let report = dispatcher.restore(entry_id).await?;
            Ok(to_value(&report))
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
