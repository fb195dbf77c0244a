//! JSON-lines framing for outbound messages.

use anyhow::{Context, Result};
use appsession_types::ForwardMsg;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writes one `ForwardMsg` per line.
pub struct JsonLineWriter<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> JsonLineWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes `messages` in order and flushes. No-op for an empty batch.
    pub async fn write_messages(&mut self, messages: Vec<ForwardMsg>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        for msg in messages {
            let mut line = serde_json::to_string(&msg)
                .with_context(|| format!("encode {} message", msg.kind()))?;
            line.push('\n');
            self.out
                .write_all(line.as_bytes())
                .await
                .context("write message")?;
        }
        self.out.flush().await.context("flush messages")
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
