//! CLI channel: JSON lines on stdin in, JSON lines on stdout out.
//!
//! Each stdin line is a [`SourceEvent`] (`{"type": "message", ...}`,
//! `{"type": "contact_opened", "contact_id": "..."}` or
//! `{"type": "opener_sent", "contact_id": "...", "text": "..."}`). A line of the form
//! `{"type": "contact_info", "contact_id": "..."}` marks the contact as having
//! disclosed contact details and produces no event.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use crate::channels::channel::{
    EventStream, MessageSource, SenderChannel, SourceEvent, TaggedContacts,
};
use crate::error::ChannelError;

/// Reads source events from stdin.
pub struct StdinSource {
    tagged: Arc<TaggedContacts>,
}

impl StdinSource {
    pub fn new(tagged: Arc<TaggedContacts>) -> Self {
        Self { tagged }
    }
}

/// Parse one stdin line. `None` for blank lines, tag lines and garbage.
fn parse_line(line: &str, tagged: &TaggedContacts) -> Option<SourceEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed stdin line");
            return None;
        }
    };

    if value.get("type").and_then(|t| t.as_str()) == Some("contact_info") {
        if let Some(id) = value.get("contact_id").and_then(|c| c.as_str()) {
            debug!(contact_id = %id, "Contact info tagged");
            tagged.tag(id);
        }
        return None;
    }

    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Ignoring unrecognized stdin event");
            None
        }
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let tagged = Arc::clone(&self.tagged);

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&line, &tagged) {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Prints each outbound send as a JSON line. Always succeeds.
#[derive(Debug, Default)]
pub struct StdoutSender;

impl StdoutSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SenderChannel for StdoutSender {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), ChannelError> {
        println!(
            "{}",
            serde_json::json!({ "contact_id": contact_id, "kind": "text", "value": text })
        );
        Ok(())
    }

    async fn send_tool(&self, contact_id: &str, tool_ref: &str) -> Result<(), ChannelError> {
        println!(
            "{}",
            serde_json::json!({ "contact_id": contact_id, "kind": "tool", "value": tool_ref })
        );
        Ok(())
    }
}
