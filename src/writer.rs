//! Result writers: where entities that passed the ledger end up.

use std::future::Future;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::config::STDOUT;
use crate::error::Result;
use crate::model::ResultRecord;

/// Accepts one structured record at a time.
pub trait ResultWriter: Send + Sync + 'static {
    fn write(&self, record: &ResultRecord) -> impl Future<Output = Result<()>> + Send;

    /// Flush buffered output. Called once when the run ends.
    fn flush(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

type Sink = Box<dyn AsyncWrite + Unpin + Send>;

/// Writes one JSON object per line.
pub struct JsonLinesWriter {
    out: Mutex<BufWriter<Sink>>,
}

impl std::fmt::Debug for JsonLinesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesWriter").finish_non_exhaustive()
    }
}

impl JsonLinesWriter {
    pub fn new(sink: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        Self {
            out: Mutex::new(BufWriter::new(Box::new(sink))),
        }
    }

    /// Open the destination. `stdout` writes standard output; anything else
    /// creates (or truncates) a file.
    pub async fn open(destination: &str) -> Result<Self> {
        if destination == STDOUT {
            return Ok(Self::new(tokio::io::stdout()));
        }
        let file = tokio::fs::File::create(destination).await?;
        Ok(Self::new(file))
    }
}

impl ResultWriter for JsonLinesWriter {
    async fn write(&self, record: &ResultRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.out.lock().await.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}
