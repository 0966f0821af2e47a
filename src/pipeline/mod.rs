//! Producer/consumer hand-off of change records.
//!
//! Each channel pass gets a [`ChangeRecordProducer`] that scans the store and a
//! [`ChangeRecordReader`] the routing loop consumes from. Producers run one after another on
//! a single background worker owned by a [`ReadService`].

mod reader;

pub use reader::{ChangeRecordProducer, ChangeRecordReader, change_record_channel};

use crate::core::{Result, RoutingError};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Level, event};

struct ReadWorker {
    jobs: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReadWorker {
    fn spawn() -> Self {
        let (jobs, mut receiver) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let join_handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
            event!(Level::DEBUG, "change record read worker stopped");
        });
        event!(Level::DEBUG, "change record read worker started");
        Self {
            jobs,
            join_handle: Some(join_handle),
        }
    }

    fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Lets queued jobs finish, then waits for the worker to exit.
    async fn shutdown(mut self) -> Result<()> {
        let join_handle = self.join_handle.take();
        drop(self);
        if let Some(join_handle) = join_handle {
            join_handle
                .await
                .map_err(|err| RoutingError::ExecutionError(format!("read worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ReadWorker {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Owner of the background worker that runs change record producers.
///
/// The worker is started on first use. After `stop` the next `execute` starts a new one.
#[derive(Default)]
pub struct ReadService {
    worker: Mutex<Option<ReadWorker>>,
}

impl ReadService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `producer` behind any producer still running.
    pub fn execute(&self, producer: ChangeRecordProducer) -> Result<()> {
        let mut worker = self.worker.lock()?;
        let mut job = producer.run().boxed();
        for _ in 0..2 {
            let running = worker.get_or_insert_with(ReadWorker::spawn);
            match running.jobs.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(rejected)) => {
                    event!(Level::WARN, "change record read worker died, restarting it");
                    job = rejected;
                    *worker = None;
                }
            }
        }
        Err(RoutingError::ExecutionError(
            "change record read worker is not accepting work".to_string(),
        ))
    }

    pub fn is_running(&self) -> bool {
        match self.worker.lock() {
            Ok(worker) => worker.as_ref().is_some_and(ReadWorker::is_running),
            Err(_) => false,
        }
    }

    /// Stops the worker after its queued producers finish.
    pub async fn stop(&self) -> Result<()> {
        let worker = self.worker.lock()?.take();
        match worker {
            Some(worker) => worker.shutdown().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChangeRecord, ChannelDescriptor, EventKind};
    use crate::memory::MemoryDataStore;
    use std::sync::Arc;

    fn seeded(count: usize) -> Arc<MemoryDataStore> {
        let store = Arc::new(MemoryDataStore::new());
        for i in 0..count {
            store.append_data(
                ChangeRecord::new("orders", "orders", EventKind::Insert, "sales")
                    .with_transaction(format!("tx{}", i / 2)),
            );
        }
        store
    }

    fn start(
        service: &ReadService,
        store: &Arc<MemoryDataStore>,
        capacity: usize,
    ) -> ChangeRecordReader {
        let (producer, reader) = change_record_channel(
            store.clone(),
            Arc::new(ChannelDescriptor::new("sales")),
            capacity,
        );
        service.execute(producer).unwrap();
        reader
    }

    #[tokio::test]
    async fn test_reads_in_id_order_and_closes_cursor() {
        let store = seeded(5);
        let service = ReadService::new();
        let mut reader = start(&service, &store, 2);

        let mut ids = Vec::new();
        while let Some(record) = reader.take().await.unwrap() {
            ids.push(record.data_id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        service.stop().await.unwrap();
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let store = seeded(2);
        let service = ReadService::new();
        let mut reader = start(&service, &store, 10);

        assert_eq!(reader.peek().await.unwrap().map(|r| r.data_id), Some(1));
        assert_eq!(reader.peek().await.unwrap().map(|r| r.data_id), Some(1));
        assert_eq!(reader.take().await.unwrap().map(|r| r.data_id), Some(1));
        assert_eq!(reader.take().await.unwrap().map(|r| r.data_id), Some(2));
        assert!(reader.peek().await.unwrap().is_none());
        assert!(reader.take().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_producer() {
        let store = seeded(50);
        let service = ReadService::new();
        let mut reader = start(&service, &store, 1);

        assert!(reader.take().await.unwrap().is_some());
        reader.set_reading(false);
        assert!(!reader.is_reading());
        assert!(reader.take().await.unwrap().is_none());

        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_reader_ends_producer() {
        let store = seeded(50);
        let service = ReadService::new();
        drop(start(&service, &store, 1));

        service.stop().await.unwrap();
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_forwarded() {
        let store = seeded(3);
        store.fail_read_at(2);
        let service = ReadService::new();
        let mut reader = start(&service, &store, 10);

        assert_eq!(reader.take().await.unwrap().map(|r| r.data_id), Some(1));
        assert!(matches!(reader.take().await, Err(RoutingError::Reader(_))));

        service.stop().await.unwrap();
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_select_failure_is_forwarded() {
        let store = seeded(3);
        store.fail_select_for_channel("sales");
        let service = ReadService::new();
        let mut reader = start(&service, &store, 10);

        assert!(matches!(reader.take().await, Err(RoutingError::Storage(_))));
    }

    #[tokio::test]
    async fn test_worker_restarts_after_stop() {
        let store = seeded(1);
        let service = ReadService::new();
        assert!(!service.is_running());

        let mut first = start(&service, &store, 10);
        assert!(service.is_running());
        assert!(first.take().await.unwrap().is_some());
        drop(first);
        service.stop().await.unwrap();
        assert!(!service.is_running());

        let mut second = start(&service, &store, 10);
        assert!(second.take().await.unwrap().is_some());
        assert!(second.take().await.unwrap().is_none());
        service.stop().await.unwrap();
    }
}
