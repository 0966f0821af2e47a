use crate::core::{ChangeRecord, ChannelDescriptor, Result};
use crate::services::{ChangeRecordCursor, DataStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{Level, event};

/// Creates the two ends of a change record hand-off for one channel pass.
///
/// The queue holds at most `capacity` records; the producer waits while it is full.
pub fn change_record_channel(
    store: Arc<dyn DataStore>,
    channel: Arc<ChannelDescriptor>,
    capacity: usize,
) -> (ChangeRecordProducer, ChangeRecordReader) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let reading = Arc::new(AtomicBool::new(true));
    let producer = ChangeRecordProducer {
        store,
        channel,
        sender,
        reading: reading.clone(),
    };
    let reader = ChangeRecordReader {
        receiver,
        peeked: None,
        reading,
    };
    (producer, reader)
}

/// Scans pending change records of a channel in ascending id order into the queue.
pub struct ChangeRecordProducer {
    store: Arc<dyn DataStore>,
    channel: Arc<ChannelDescriptor>,
    sender: mpsc::Sender<Result<ChangeRecord>>,
    reading: Arc<AtomicBool>,
}

impl ChangeRecordProducer {
    /// Runs until the cursor is exhausted, the reader cancels or goes away, or a read fails.
    /// The cursor is closed on every one of those paths.
    pub async fn run(self) {
        let mut cursor = match self.store.select_data_to_route(&self.channel).await {
            Ok(cursor) => cursor,
            Err(err) => {
                let _ = self.sender.send(Err(err)).await;
                return;
            }
        };

        let records_read = self.pump(cursor.as_mut()).await;

        if let Err(err) = cursor.close().await {
            event!(
                Level::WARN,
                channel_id = %self.channel.channel_id,
                error = %err,
                "failed to close change record cursor"
            );
        }
        event!(
            Level::DEBUG,
            channel_id = %self.channel.channel_id,
            records_read,
            cancelled = !self.reading.load(Ordering::SeqCst),
            "change record reader finished"
        );
    }

    async fn pump(&self, cursor: &mut dyn ChangeRecordCursor) -> usize {
        let mut records_read = 0;
        while self.reading.load(Ordering::SeqCst) {
            match cursor.next().await {
                Ok(Some(record)) => {
                    if self.sender.send(Ok(record)).await.is_err() {
                        break;
                    }
                    records_read += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = self.sender.send(Err(err)).await;
                    break;
                }
            }
        }
        records_read
    }
}

/// Consuming end of the hand-off. Owned by the routing loop.
pub struct ChangeRecordReader {
    receiver: mpsc::Receiver<Result<ChangeRecord>>,
    peeked: Option<ChangeRecord>,
    reading: Arc<AtomicBool>,
}

impl ChangeRecordReader {
    /// Waits for the next record. `None` once the stream ended or reading was cancelled.
    pub async fn take(&mut self) -> Result<Option<ChangeRecord>> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.receive().await
    }

    /// Waits for the next record without consuming it.
    pub async fn peek(&mut self) -> Result<Option<&ChangeRecord>> {
        if self.peeked.is_none() {
            self.peeked = self.receive().await?;
        }
        Ok(self.peeked.as_ref())
    }

    async fn receive(&mut self) -> Result<Option<ChangeRecord>> {
        if !self.is_reading() {
            return Ok(None);
        }
        match self.receiver.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// `set_reading(false)` stops the producer and closes the queue so a producer waiting on
    /// a full queue wakes up.
    pub fn set_reading(&mut self, reading: bool) {
        self.reading.store(reading, Ordering::SeqCst);
        if !reading {
            self.peeked = None;
            self.receiver.close();
        }
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }
}
