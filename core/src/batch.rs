//! Batch execution over a list of work items.
//!
//! The credential is read once and the run context built before any item is
//! touched, so a bad base URL fails the run with zero requests sent. Items
//! then run strictly in order. A failing item either aborts the run or, with
//! continue-on-fail, becomes an error record in the output at its position.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, info_span, warn};

use crate::binary::{BinaryData, BinaryRef};
use crate::config::{CredentialSource, RunOptions};
use crate::context::DavContext;
use crate::error::{DavError, FriendlyError};
use crate::http::HttpTransport;
use crate::operation::{self, Task};

/// One output record, linked back to the input item it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub json: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BTreeMap<String, BinaryRef>>,
    pub paired_item: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    options: RunOptions,
}

impl BatchRunner {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run every task in order and collect one output per input.
    pub fn run(
        &self,
        credentials: &dyn CredentialSource,
        tasks: Vec<Task>,
        transport: &dyn HttpTransport,
        binary: &dyn BinaryData,
    ) -> Result<Vec<OutputItem>, DavError> {
        let credential = credentials.credential()?;
        let ctx = DavContext::new(credential)?;
        info!(
            items = tasks.len(),
            base_url = ctx.base_root(),
            continue_on_fail = self.options.continue_on_fail,
            "starting DAV batch"
        );

        let mut outputs = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let resource = task.operation.get("resource").and_then(Value::as_str).unwrap_or_default();
            let operation_name = task.operation.get("operation").and_then(Value::as_str).unwrap_or_default();
            let span = info_span!("item", index, resource, operation = operation_name);
            let _guard = span.enter();

            let result = operation::dispatch_raw(&ctx, transport, binary, index, &task.item, &task.operation);

            match result {
                Ok(outcome) => {
                    let mut json = task.item.json;
                    json.extend(outcome.fields);
                    let mut attachments = task.item.binary;
                    if !outcome.binary.is_empty() {
                        attachments
                            .get_or_insert_with(BTreeMap::new)
                            .extend(outcome.binary);
                    }
                    outputs.push(OutputItem {
                        json,
                        binary: attachments,
                        paired_item: index,
                    });
                }
                Err(error) if error.is_fatal() => {
                    warn!(error = %error, "aborting batch");
                    return Err(error);
                }
                Err(error) if self.options.continue_on_fail => {
                    warn!(error = %error, "item failed, continuing");
                    let mut json = task.item.json;
                    json.insert("error".to_string(), Value::String(error.to_string()));
                    outputs.push(OutputItem {
                        json,
                        binary: task.item.binary,
                        paired_item: index,
                    });
                }
                Err(error) => {
                    warn!(error = %error, "item failed, stopping batch");
                    return Err(FriendlyError {
                        message: error.to_string(),
                        item_index: index,
                        http_status: error.http_status(),
                    }
                    .into());
                }
            }
        }

        info!(outputs = outputs.len(), "DAV batch finished");
        Ok(outputs)
    }
}
