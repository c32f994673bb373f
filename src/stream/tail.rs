//! Capture log tail
//!
//! Polls the capture log for growth and turns each newly completed line into
//! a live event. Only whole lines are consumed, so a record still being
//! written is picked up on a later poll. A shrinking file resets the offset.

use crate::models::{FlowRecord, LiveEvent};
use crate::storage::trim_line;
use crate::stream::broadcaster::Broadcaster;
use anyhow::Context;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LogTail {
    path: PathBuf,
    offset: u64,
}

impl LogTail {
    /// Tail from the current end of the file; existing records are skipped.
    pub async fn from_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };
        Self { path, offset }
    }

    /// Tail from the beginning of the file.
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read whatever was appended since the last poll.
    ///
    /// On a read error the offset is left where it was so the increment is
    /// retried on the next poll.
    pub async fn poll_once(&mut self) -> anyhow::Result<Vec<FlowRecord>> {
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => {
                return Err(err).with_context(|| format!("inspecting {:?}", self.path));
            }
        };

        if size < self.offset {
            tracing::info!(
                "Capture log {:?} shrank ({} < {}), restarting from the top",
                self.path,
                size,
                self.offset
            );
            self.offset = 0;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("opening {:?}", self.path))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .with_context(|| format!("seeking {:?}", self.path))?;
        let mut chunk = Vec::with_capacity((size - self.offset) as usize);
        file.take(size - self.offset)
            .read_to_end(&mut chunk)
            .await
            .with_context(|| format!("reading {:?}", self.path))?;

        let Some(last_newline) = chunk.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &chunk[..=last_newline];

        let mut records = Vec::new();
        for line in complete.split(|b| *b == b'\n') {
            let line = trim_line(line);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<FlowRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!("Skipping malformed capture line: {}", err),
            }
        }

        self.offset += complete.len() as u64;
        Ok(records)
    }

    /// Poll every `every` and publish new records until `shutdown` flips.
    pub fn spawn(
        mut self,
        broadcaster: Arc<Broadcaster>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Tailing capture log {:?} from offset {}", self.path, self.offset);
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(records) => {
                                for record in records {
                                    broadcaster.publish(&LiveEvent::NewCapture(record));
                                }
                            }
                            Err(err) => tracing::warn!("Capture tail poll failed: {:#}", err),
                        }
                    }
                }
            }
            tracing::info!("Capture log tail stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn line(id: &str) -> String {
        format!(
            "{{\"id\":\"{id}\",\"timestamp\":1,\"request\":{{\"method\":\"GET\",\"url\":\"http://a.local/{id}\",\"host\":\"a.local\",\"path\":\"/{id}\"}}}}\n"
        )
    }

    fn append(path: &Path, text: &str) {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
    }

    fn ids(records: Vec<FlowRecord>) -> Vec<String> {
        records.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn delivers_appended_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.jsonl");
        append(&path, &line("old"));

        let mut tail = LogTail::from_end(&path).await;
        assert!(tail.poll_once().await.unwrap().is_empty());

        append(&path, &line("a"));
        append(&path, &line("b"));
        assert_eq!(ids(tail.poll_once().await.unwrap()), vec!["a", "b"]);
        assert!(tail.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.jsonl");
        let mut tail = LogTail::from_start(&path);

        append(&path, &line("a"));
        append(&path, "{not a record\n");
        append(&path, &line("b"));
        assert_eq!(ids(tail.poll_once().await.unwrap()), vec!["a", "b"]);
        assert_eq!(tail.offset(), std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn partial_line_waits_for_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.jsonl");
        let mut tail = LogTail::from_start(&path);

        let full = line("a");
        let (head, rest) = full.split_at(10);
        append(&path, head);
        assert!(tail.poll_once().await.unwrap().is_empty());
        assert_eq!(tail.offset(), 0);

        append(&path, rest);
        assert_eq!(ids(tail.poll_once().await.unwrap()), vec!["a"]);
    }

    #[tokio::test]
    async fn truncation_resets_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.jsonl");
        let mut tail = LogTail::from_start(&path);

        append(&path, &line("a"));
        append(&path, &line("b"));
        assert_eq!(tail.poll_once().await.unwrap().len(), 2);

        std::fs::File::create(&path).unwrap();
        assert!(tail.poll_once().await.unwrap().is_empty());
        assert_eq!(tail.offset(), 0);

        append(&path, &line("c"));
        assert_eq!(ids(tail.poll_once().await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn spawned_tail_publishes_to_subscribers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captures.jsonl");
        let broadcaster = Broadcaster::new(8);
        let mut sub = broadcaster.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = LogTail::from_end(&path).await.spawn(
            Arc::clone(&broadcaster),
            Duration::from_millis(20),
            shutdown_rx,
        );
        append(&path, &line("live"));

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        match event {
            LiveEvent::NewCapture(record) => assert_eq!(record.id, "live"),
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
