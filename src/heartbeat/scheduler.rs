//! Jittered prompt loop.

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::prompts::BUILTIN_PROMPTS;
use crate::core::dispatcher::WeakDispatcher;
use crate::core::types::{Priority, Role, SubmitOptions};

/// Loop cadence and corpus.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Base sleep between prompts; up to half of it again is added as jitter.
    pub interval: Duration,
    /// Replaces the built-in corpus when set and non-empty.
    pub prompts: Option<Vec<String>>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300_000),
            prompts: None,
        }
    }
}

/// Handle to a running loop.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    token: CancellationToken,
}

impl LoopHandle {
    /// Cancel the loop, abandoning the current sleep.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            tracing::info!(kind = "system", "Prompt loop cancelled");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct LoopScheduler {
    dispatcher: WeakDispatcher,
    interval: Duration,
    prompts: Vec<String>,
}

impl LoopScheduler {
    pub fn new(dispatcher: WeakDispatcher, options: LoopOptions) -> Self {
        let prompts = match options.prompts {
            Some(prompts) if !prompts.is_empty() => prompts,
            _ => BUILTIN_PROMPTS.iter().map(|p| p.to_string()).collect(),
        };
        Self {
            dispatcher,
            interval: options.interval,
            prompts,
        }
    }

    /// Spawn the loop. `initial_prompt` is submitted right away at high priority.
    pub fn start(self, initial_prompt: Option<String>) -> LoopHandle {
        let token = CancellationToken::new();
        let handle = LoopHandle {
            token: token.clone(),
        };
        tokio::spawn(self.run(initial_prompt, token));
        handle
    }

    async fn run(self, initial_prompt: Option<String>, token: CancellationToken) {
        tracing::info!(
            kind = "system",
            "Prompt loop started (every {}s, {} prompts)",
            self.interval.as_secs(),
            self.prompts.len()
        );

        if let Some(prompt) = initial_prompt {
            if !self.submit_detached(prompt, Priority::High) {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.next_delay()) => {}
            }

            if let Some(prompt) = self.pick() {
                if !self.submit_detached(prompt, Priority::Low) {
                    break;
                }
            }
        }

        tracing::info!(kind = "system", "Prompt loop stopped");
    }

    /// Submit without waiting for the reply; failures are only logged.
    ///
    /// Returns false once the dispatcher is gone.
    fn submit_detached(&self, prompt: String, priority: Priority) -> bool {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            tracing::info!(kind = "system", "Dispatcher dropped, prompt loop exiting");
            return false;
        };
        tokio::spawn(async move {
            if let Err(e) = dispatcher
                .submit(prompt, Role::System, SubmitOptions::with_priority(priority))
                .await
            {
                tracing::error!("Loop prompt failed: {}", e);
            }
        });
        true
    }

    fn next_delay(&self) -> Duration {
        let half = self.interval.as_millis() as u64 / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        self.interval + Duration::from_millis(jitter)
    }

    fn pick(&self) -> Option<String> {
        self.prompts.choose(&mut rand::thread_rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::core::types::{AgentReply, QueuedItem};
    use crate::delivery::{DeliveryStrategy, StrategyKind};
    use crate::error::Result;
    use crate::ui::NullUi;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records every prompt and answers with nothing, so no follow-ups are produced.
    #[derive(Default)]
    struct SilentStrategy {
        sent: Mutex<Vec<(String, Priority)>>,
    }

    impl SilentStrategy {
        fn sent(&self) -> Vec<(String, Priority)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryStrategy for SilentStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Poller
        }

        async fn send(&self, item: &QueuedItem) -> Result<Option<AgentReply>> {
            self.sent
                .lock()
                .unwrap()
                .push((item.prompt.clone(), item.priority));
            Ok(None)
        }
    }

    fn options() -> LoopOptions {
        LoopOptions {
            interval: Duration::from_secs(1),
            prompts: Some(vec!["only question".to_string()]),
        }
    }

    fn dispatcher(strategy: Arc<SilentStrategy>) -> Dispatcher {
        Dispatcher::new(strategy, Arc::new(NullUi), DispatcherConfig::default())
    }

    async fn wait_for(strategy: &SilentStrategy, count: usize) {
        while strategy.sent().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_prompt_then_loop_prompt() {
        let strategy = Arc::new(SilentStrategy::default());
        let dispatcher = dispatcher(strategy.clone());

        let handle = dispatcher.start_loop(Some("Hello Skysent".to_string()), options());
        wait_for(&strategy, 2).await;
        handle.stop();

        let sent = strategy.sent();
        assert_eq!(sent[0], ("Hello Skysent".to_string(), Priority::High));
        assert_eq!(sent[1], ("only question".to_string(), Priority::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_loop_runs() {
        let strategy = Arc::new(SilentStrategy::default());
        let dispatcher = dispatcher(strategy);

        let first = dispatcher.start_loop(None, options());
        let second = dispatcher.start_loop(None, options());
        second.stop();
        assert!(first.is_stopped());

        // A stopped loop can be replaced.
        let third = dispatcher.start_loop(None, options());
        assert!(!third.is_stopped());
        third.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_sleep() {
        let strategy = Arc::new(SilentStrategy::default());
        let dispatcher = dispatcher(strategy.clone());

        let handle = dispatcher.start_loop(None, options());
        wait_for(&strategy, 1).await;
        handle.stop();

        let count = strategy.sent().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(strategy.sent().len(), count);
    }

    #[test]
    fn test_empty_corpus_falls_back_to_builtin() {
        let dispatcher = dispatcher(Arc::default());
        let scheduler = LoopScheduler::new(
            dispatcher.downgrade(),
            LoopOptions {
                prompts: Some(Vec::new()),
                ..LoopOptions::default()
            },
        );
        assert_eq!(scheduler.prompts.len(), BUILTIN_PROMPTS.len());
        assert!(scheduler.pick().is_some());
        let delay = scheduler.next_delay();
        drop(dispatcher);
        assert!(!scheduler.submit_detached("late".to_string(), Priority::Low));
        assert!(delay >= Duration::from_secs(300) && delay <= Duration::from_secs(450));
    }
}
