use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const OUTPUT_BUFFER: usize = 16;

/// Forwards a value only once no newer value has arrived for `delay`.
///
/// Every `push` replaces the pending value and restarts the quiet period.
/// Cancelling or dropping the debouncer discards whatever is pending.
pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<T>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration) -> (Self, mpsc::Receiver<T>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (output, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(debounce_loop(delay, input_rx, output, cancel.clone()));

        (Self { input, cancel, task }, output_rx)
    }

    /// Returns false once the debouncer has been torn down.
    pub fn push(&self, value: T) -> bool {
        !self.cancel.is_cancelled() && self.input.send(value).is_ok()
    }
}

impl<T> Debouncer<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn debounce_loop<T>(
    delay: Duration,
    mut input: mpsc::UnboundedReceiver<T>,
    output: mpsc::Sender<T>,
    cancel: CancellationToken,
) {
    let mut pending: Option<T> = None;
    let timer = tokio::time::sleep(delay);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            value = input.recv() => match value {
                Some(value) => {
                    pending = Some(value);
                    timer.as_mut().reset(Instant::now() + delay);
                }
                None => break,
            },

            _ = &mut timer, if pending.is_some() => {
                if let Some(value) = pending.take() {
                    if output.send(value).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_rapid_input_fires_once_with_last_value() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(500));

        debouncer.push("I".to_string());
        sleep(Duration::from_millis(80)).await;
        debouncer.push("In".to_string());
        sleep(Duration::from_millis(80)).await;
        debouncer.push("Inc".to_string());

        sleep(Duration::from_millis(499)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        assert_eq!(rx.recv().await.as_deref(), Some("Inc"));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_values_each_fire() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));

        debouncer.push(1);
        sleep(Duration::from_millis(150)).await;
        debouncer.push(2);
        sleep(Duration::from_millis(150)).await;

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_value() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(500));

        debouncer.push("stale");
        sleep(Duration::from_millis(100)).await;
        debouncer.cancel();
        assert!(!debouncer.push("after"));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_discards_pending_value() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(500));
        debouncer.push(42);
        drop(debouncer);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, None);
    }
}
