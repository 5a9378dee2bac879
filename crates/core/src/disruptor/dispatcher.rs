use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use thiserror::Error;
use tokio::{
    sync::{oneshot, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ConsumerCompletionResult, ConsumerInput, ConsumerResult, DisruptorBarriers};

/// One processing stage
pub type Consumer = Box<dyn FnMut(&mut ConsumerInput) -> ConsumerResult + Send>;

/// Invoked once per element with its id and final outcome
pub type CompletionCallback = Box<dyn FnOnce(u64, ConsumerCompletionResult) + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("dispatcher is shut down")]
    Shutdown,

    #[error("cannot dispatch empty input")]
    EmptyInput,
}

#[derive(Debug, Clone)]
pub struct ConsumerDispatcherOptions {
    pub name: String,

    /// Maximum number of elements in flight
    pub capacity: usize,
}

impl ConsumerDispatcherOptions {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

struct DisruptorElement {
    id: u64,
    input: ConsumerInput,
    completion: Option<ConsumerCompletionResult>,
    callback: CompletionCallback,
}

struct Shared {
    name: String,
    ring: Vec<Mutex<Option<DisruptorElement>>>,
    barriers: DisruptorBarriers,

    /// Number of elements published so far
    cursor: AtomicU64,

    progress: Notify,
    cancel: CancellationToken,
}

impl Shared {
    fn slot(&self, position: u64) -> &Mutex<Option<DisruptorElement>> {
        &self.ring[(position % self.ring.len() as u64) as usize]
    }

    /// Number of elements visible to the stage at `level`
    fn available_to(&self, level: usize) -> u64 {
        match level {
            0 => self.cursor.load(Ordering::Acquire),
            x => self.barriers[x - 1].position(),
        }
    }

    fn completed(&self) -> u64 {
        self.barriers
            .last_position()
            .unwrap_or_else(|| self.cursor.load(Ordering::Acquire))
    }

    /// Waits until `ready` holds; `false` if cancelled first
    async fn wait_for(&self, ready: impl Fn() -> bool) -> bool {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if ready() {
                return true;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut notified => {}
            }
        }
    }
}

/// Runs inputs through an ordered list of consumers
///
/// Must be created inside a tokio runtime. Every consumer gets its own task and
/// runs its work on the blocking pool.
pub struct ConsumerDispatcher {
    shared: Arc<Shared>,
    publish: tokio::sync::Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerDispatcher {
    pub fn new(options: ConsumerDispatcherOptions, consumers: Vec<Consumer>) -> Self {
        let capacity = options.capacity.max(1);

        let shared = Arc::new(Shared {
            name: options.name,
            ring: (0..capacity).map(|_| Mutex::new(None)).collect(),
            barriers: DisruptorBarriers::new(consumers.len()),
            cursor: AtomicU64::new(0),
            progress: Notify::new(),
            cancel: CancellationToken::new(),
        });

        let last = consumers.len().saturating_sub(1);

        let workers = consumers
            .into_iter()
            .enumerate()
            .map(|(level, consumer)| {
                tokio::spawn(run_stage(shared.clone(), level, level == last, consumer))
            })
            .collect();

        info!(
            dispatcher = %shared.name,
            capacity,
            consumers = shared.barriers.len(),
            "consumer dispatcher started"
        );

        Self {
            shared,
            publish: tokio::sync::Mutex::new(()),
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn num_consumers(&self) -> usize {
        self.shared.barriers.len()
    }

    pub fn barriers(&self) -> &DisruptorBarriers {
        &self.shared.barriers
    }

    pub fn num_added_elements(&self) -> u64 {
        self.shared.cursor.load(Ordering::Acquire)
    }

    pub fn num_completed_elements(&self) -> u64 {
        self.shared.completed()
    }

    pub fn num_active_elements(&self) -> u64 {
        self.num_added_elements() - self.num_completed_elements()
    }

    pub fn is_running(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Publishes an input, waiting for ring space; returns the element id
    pub async fn process_element(
        &self,
        input: ConsumerInput,
        callback: CompletionCallback,
    ) -> Result<u64, DispatcherError> {
        if input.is_empty() {
            return Err(DispatcherError::EmptyInput);
        }

        if !self.is_running() {
            return Err(DispatcherError::Shutdown);
        }

        let _guard = self.publish.lock().await;
        let shared = &self.shared;
        let position = shared.cursor.load(Ordering::Acquire);
        let id = position + 1;

        if shared.barriers.is_empty() {
            shared.cursor.store(id, Ordering::Release);
            callback(id, ConsumerCompletionResult::normal());
            return Ok(id);
        }

        let capacity = shared.ring.len() as u64;
        let has_space = shared.wait_for(|| position - shared.completed() < capacity).await;

        if !has_space {
            return Err(DispatcherError::Shutdown);
        }

        trace!(dispatcher = %shared.name, id, %input, "publishing element");

        *shared.slot(position).lock().unwrap() = Some(DisruptorElement {
            id,
            input,
            completion: None,
            callback,
        });

        shared.cursor.store(id, Ordering::Release);
        shared.progress.notify_waiters();

        Ok(id)
    }

    /// Publishes an input and waits for its outcome
    pub async fn submit(
        &self,
        input: ConsumerInput,
    ) -> Result<ConsumerCompletionResult, DispatcherError> {
        let (tx, rx) = oneshot::channel();

        let callback: CompletionCallback = Box::new(move |_: u64, result| {
            // the submitter may have gone away
            let _ = tx.send(result);
        });

        self.process_element(input, callback).await?;

        rx.await.map_err(|_| DispatcherError::Shutdown)
    }

    /// Stops every stage
    ///
    /// In-flight elements are dropped without completing, so their submitters
    /// get [`DispatcherError::Shutdown`]. An element held by a running consumer
    /// is dropped once that consumer returns.
    pub fn shutdown(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }

        self.shared.cancel.cancel();

        for worker in self.workers.lock().unwrap().drain(..) {
            worker.abort();
        }

        let dropped = self
            .shared
            .ring
            .iter()
            .filter_map(|slot| slot.lock().unwrap().take())
            .count();

        info!(
            dispatcher = %self.shared.name,
            added = self.num_added_elements(),
            completed = self.num_completed_elements(),
            dropped,
            "consumer dispatcher shut down"
        );
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Moves the element at each position through one consumer
///
/// Consumers run on the blocking pool; the element leaves its ring slot while
/// the consumer holds it.
async fn run_stage(shared: Arc<Shared>, level: usize, is_last: bool, mut consumer: Consumer) {
    let mut position = 0u64;

    loop {
        if !shared.wait_for(|| shared.available_to(level) > position).await {
            debug!(dispatcher = %shared.name, level, "stage cancelled");
            return;
        }

        let Some(mut element) = shared.slot(position).lock().unwrap().take() else {
            warn!(dispatcher = %shared.name, level, position, "missing element in ring");
            return;
        };

        if element.completion.is_none() {
            let task = tokio::task::spawn_blocking(move || {
                let result = consumer(&mut element.input);
                (consumer, element, result)
            });

            let (returned, mut processed, result) = match task.await {
                Ok(x) => x,
                Err(err) => {
                    error!(dispatcher = %shared.name, level, %err, "consumer failed");
                    return;
                }
            };

            consumer = returned;
            processed.completion = ConsumerCompletionResult::from_stage(level, result);

            if let Some(completion) = &processed.completion {
                debug!(
                    dispatcher = %shared.name,
                    level,
                    id = processed.id,
                    status = ?completion.status,
                    code = %completion.code,
                    "element stopped"
                );
            }

            element = processed;
        }

        if is_last {
            let completion = element
                .completion
                .unwrap_or_else(ConsumerCompletionResult::normal);

            (element.callback)(element.id, completion);
        } else {
            *shared.slot(position).lock().unwrap() = Some(element);
        }

        position += 1;
        shared.barriers[level].advance(position);
        shared.progress.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        zero_hash, Amount, Block, CompletionStatus, Difficulty, EntityType, Height, InputSource,
        Key, NetworkIdentifier, Signature, Timestamp, Transaction, ValidationResult,
    };

    fn transactions_input(count: usize) -> ConsumerInput {
        let range = (0..count)
            .map(|i| Transaction {
                signer: Key([1; 32]),
                signature: Signature::default(),
                version: 1,
                network: NetworkIdentifier::TESTNET,
                entity_type: EntityType(1),
                max_fee: Amount(0),
                deadline: Timestamp(i as u64),
                payload: vec![],
            })
            .collect();

        ConsumerInput::from_transactions(range, InputSource::Local)
    }

    fn block_input(height: u64) -> ConsumerInput {
        let block = Block {
            signer: Key([1; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            height: Height(height),
            timestamp: Timestamp(0),
            difficulty: Difficulty(1),
            previous_block_hash: zero_hash(),
            transactions: vec![],
        };

        ConsumerInput::from_blocks([block].into_iter().collect(), InputSource::Local)
    }

    type Log = Arc<Mutex<Vec<(usize, u64)>>>;

    fn recording_consumer(level: usize, log: Log) -> Consumer {
        Box::new(move |input: &mut ConsumerInput| {
            let height = input.blocks()[0].height().get();
            log.lock().unwrap().push((level, height));
            ConsumerResult::Continue
        })
    }

    #[tokio::test]
    async fn no_consumers_completes_immediately() {
        let dispatcher =
            ConsumerDispatcher::new(ConsumerDispatcherOptions::new("empty", 4), vec![]);

        let result = dispatcher.submit(transactions_input(2)).await.unwrap();

        assert_eq!(result, ConsumerCompletionResult::normal());
        assert_eq!(dispatcher.num_added_elements(), 1);
        assert_eq!(dispatcher.num_active_elements(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let dispatcher =
            ConsumerDispatcher::new(ConsumerDispatcherOptions::new("test", 4), vec![]);

        assert_eq!(
            dispatcher.submit(ConsumerInput::default()).await,
            Err(DispatcherError::EmptyInput)
        );
    }

    #[tokio::test]
    async fn abort_skips_remaining_stages() {
        let reached = Arc::new(AtomicU64::new(0));
        let counter = reached.clone();

        let consumers: Vec<Consumer> = vec![
            Box::new(|_: &mut ConsumerInput| ConsumerResult::Continue),
            Box::new(|input: &mut ConsumerInput| {
                if input.transactions().len() > 2 {
                    ConsumerResult::abort_at(ValidationResult::failure("Test", 1, "Too_Many"), 2)
                } else {
                    ConsumerResult::Continue
                }
            }),
            Box::new(move |_: &mut ConsumerInput| {
                counter.fetch_add(1, Ordering::SeqCst);
                ConsumerResult::Continue
            }),
        ];

        let dispatcher = ConsumerDispatcher::new(ConsumerDispatcherOptions::new("test", 4), consumers);

        let aborted = dispatcher.submit(transactions_input(3)).await.unwrap();
        assert_eq!(aborted.status, CompletionStatus::Aborted);
        assert_eq!(aborted.consumer, Some(1));
        assert_eq!(aborted.element, Some(2));
        assert_eq!(aborted.code.to_string(), "Failure_Test_Too_Many");

        let normal = dispatcher.submit(transactions_input(1)).await.unwrap();
        assert_eq!(normal.status, CompletionStatus::Normal);

        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.num_completed_elements(), 2);
    }

    #[tokio::test]
    async fn consumed_elements_complete_early() {
        let consumers: Vec<Consumer> = vec![
            Box::new(|_: &mut ConsumerInput| ConsumerResult::Consumed),
            Box::new(|_: &mut ConsumerInput| -> ConsumerResult {
                panic!("consumed elements must not reach later stages")
            }),
        ];

        let dispatcher = ConsumerDispatcher::new(ConsumerDispatcherOptions::new("test", 2), consumers);
        let result = dispatcher.submit(transactions_input(1)).await.unwrap();

        assert_eq!(result.status, CompletionStatus::Consumed);
        assert_eq!(result.consumer, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stages_process_elements_in_publication_order() {
        let log: Log = Default::default();

        let consumers = (0..3).map(|level| recording_consumer(level, log.clone())).collect();
        let dispatcher = Arc::new(ConsumerDispatcher::new(
            ConsumerDispatcherOptions::new("ordered", 2),
            consumers,
        ));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for height in 1..=6 {
            let tx = tx.clone();
            let callback: CompletionCallback = Box::new(move |id, _| {
                let _ = tx.send(id);
            });

            dispatcher
                .process_element(block_input(height), callback)
                .await
                .unwrap();
        }

        let mut completed = vec![];
        for _ in 1..=6 {
            let id = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            completed.push(id);
        }

        assert_eq!(completed, vec![1, 2, 3, 4, 5, 6]);

        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 18);

        for level in 0..3 {
            let seen: Vec<_> = log.iter().filter(|(l, _)| *l == level).map(|(_, h)| *h).collect();
            assert_eq!(seen, vec![1, 2, 3, 4, 5, 6], "stage {level}");
        }

        // a stage only sees an element after the previous stage finished it
        for height in 1..=6u64 {
            let order: Vec<_> = log
                .iter()
                .enumerate()
                .filter(|(_, (_, h))| *h == height)
                .map(|(idx, (level, _))| (*level, idx))
                .collect();

            assert!(order.windows(2).all(|x| x[0].0 < x[1].0 && x[0].1 < x[1].1));
        }

        for level in 0..3 {
            assert_eq!(dispatcher.barriers()[level].position(), 6);
        }
        assert_eq!(dispatcher.num_active_elements(), 0);
    }

    #[tokio::test]
    async fn producer_waits_for_ring_space() {
        let consumers: Vec<Consumer> =
            vec![Box::new(|_: &mut ConsumerInput| ConsumerResult::Continue)];

        let dispatcher =
            ConsumerDispatcher::new(ConsumerDispatcherOptions::new("bounded", 1), consumers);

        let (first, second) = tokio::join!(
            dispatcher.submit(block_input(1)),
            dispatcher.submit(block_input(2))
        );

        assert_eq!(first.unwrap().status, CompletionStatus::Normal);
        assert_eq!(second.unwrap().status, CompletionStatus::Normal);
        assert_eq!(dispatcher.num_added_elements(), 2);
        assert_eq!(dispatcher.barriers()[0].position(), 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_elements() {
        let consumers: Vec<Consumer> =
            vec![Box::new(|_: &mut ConsumerInput| ConsumerResult::Continue)];
        let dispatcher = ConsumerDispatcher::new(ConsumerDispatcherOptions::new("test", 2), consumers);

        dispatcher.shutdown();

        assert!(!dispatcher.is_running());
        assert_eq!(
            dispatcher.submit(block_input(1)).await,
            Err(DispatcherError::Shutdown)
        );
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_submitters() {
        let (started_tx, started_rx) = std::sync::mpsc::channel::<u64>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let consumers: Vec<Consumer> = vec![
            Box::new(|_: &mut ConsumerInput| ConsumerResult::Continue),
            Box::new(move |input: &mut ConsumerInput| {
                let _ = started_tx.send(input.blocks()[0].height().get());
                let _ = release_rx.recv();
                ConsumerResult::Continue
            }),
        ];

        let dispatcher = Arc::new(ConsumerDispatcher::new(
            ConsumerDispatcherOptions::new("slow", 4),
            consumers,
        ));

        let submit = |height: u64| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(block_input(height)).await })
        };

        let first = submit(1);
        let started = tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap();
        assert_eq!(started, Ok(1));

        let second = submit(2);

        // the second element waits in the ring behind the slow stage
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.barriers()[0].position() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        dispatcher.shutdown();

        let second = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, Err(DispatcherError::Shutdown));

        release_tx.send(()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Err(DispatcherError::Shutdown));
    }
}
