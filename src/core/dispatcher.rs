//! Single-consumer dispatcher.
//!
//! `submit` queues an item and wakes the consumer; the consumer drains the queue one
//! item at a time through the active delivery strategy, feeding replies back into the
//! conversation orchestrator and failures into the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use super::conversation::{
    Advance, AgentNames, ConversationOrchestrator, DEFAULT_EXCERPT_CHARS, MAX_CONVERSATION_DEPTH,
};
use super::dedup::{Deduplicator, DEFAULT_DEDUP_WINDOW, DEFAULT_QUIET_MARKERS};
use super::queue::{DispatchQueue, QueueStats};
use super::retry::{RetryDecision, RetryPolicy, MAX_RETRIES};
use super::types::{AgentReply, Completion, QueuedItem, Role, SubmitOptions};
use crate::config::Settings;
use crate::delivery::{create_strategy, DeliveryStrategy, StrategyKind, TimeoutPolicy};
use crate::error::{Error, Result};
use crate::heartbeat::{LoopHandle, LoopOptions, LoopScheduler};
use crate::transport::{Channels, PushChannel};
use crate::ui::{UiMessage, UiSink};

/// Tunables for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_conversation_depth: u32,
    pub max_retries: u32,
    pub follow_up_excerpt_chars: usize,
    pub dedup_window: Duration,
    /// Broadcasts containing any of these are dispatched without a UI echo.
    pub quiet_markers: Vec<String>,
    pub timeouts: TimeoutPolicy,
    pub names: AgentNames,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_conversation_depth: MAX_CONVERSATION_DEPTH,
            max_retries: MAX_RETRIES,
            follow_up_excerpt_chars: DEFAULT_EXCERPT_CHARS,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            quiet_markers: DEFAULT_QUIET_MARKERS.iter().map(|m| m.to_string()).collect(),
            timeouts: TimeoutPolicy::default(),
            names: AgentNames::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_conversation_depth: settings.dispatch.max_conversation_depth,
            max_retries: settings.dispatch.max_retries,
            follow_up_excerpt_chars: settings.dispatch.follow_up_excerpt_chars,
            dedup_window: settings.dispatch.dedup_window(),
            quiet_markers: settings.dispatch.quiet_markers.clone(),
            timeouts: settings.timeouts.to_policy(),
            names: settings.agents.names(),
        }
    }
}

/// Mutable state shared between submitters and the consumer.
pub struct DispatchState {
    pub queue: DispatchQueue,
    pub conversations: ConversationOrchestrator,
    pub dedup: Deduplicator,
}

struct Shared {
    state: Mutex<DispatchState>,
    running: AtomicBool,
    strategy: Arc<dyn DeliveryStrategy>,
    ui: Arc<dyn UiSink>,
    retry: RetryPolicy,
    timeouts: TimeoutPolicy,
    quiet_markers: Vec<String>,
    schedule: Mutex<Option<LoopHandle>>,
}

/// Handle to a dispatcher. Cheap to clone; all clones drive the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

/// Non-owning handle; background tasks hold this so they never keep a dispatcher alive.
#[derive(Clone)]
pub struct WeakDispatcher {
    shared: Weak<Shared>,
}

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.shared.upgrade().map(|shared| Dispatcher { shared })
    }
}

impl Dispatcher {
    pub fn new(
        strategy: Arc<dyn DeliveryStrategy>,
        ui: Arc<dyn UiSink>,
        config: DispatcherConfig,
    ) -> Self {
        let state = DispatchState {
            queue: DispatchQueue::new(),
            conversations: ConversationOrchestrator::new(
                config.max_conversation_depth,
                config.follow_up_excerpt_chars,
                config.names,
            ),
            dedup: Deduplicator::new(config.dedup_window),
        };

        tracing::info!(
            kind = "system",
            "Dispatcher ready ({} strategy, max depth {}, max retries {})",
            strategy.kind(),
            config.max_conversation_depth,
            config.max_retries
        );

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                running: AtomicBool::new(false),
                strategy,
                ui,
                retry: RetryPolicy::new(config.max_retries),
                timeouts: config.timeouts,
                quiet_markers: config.quiet_markers,
                schedule: Mutex::new(None),
            }),
        }
    }

    /// Build the strategy named in `settings` and a dispatcher around it.
    pub fn from_settings(settings: &Settings, ui: Arc<dyn UiSink>) -> Self {
        Self::new(
            create_strategy(settings),
            ui,
            DispatcherConfig::from_settings(settings),
        )
    }

    /// Queue a prompt and wait until it settles.
    ///
    /// Resolves with the first reply to this prompt; follow-up turns it triggers keep
    /// running in the background.
    pub async fn submit(
        &self,
        prompt: impl Into<String>,
        role: Role,
        options: SubmitOptions,
    ) -> Result<Option<AgentReply>> {
        let prompt = prompt.into();
        let class = self.shared.timeouts.classify(&prompt);
        let (completion, settled) = Completion::channel();

        let mut item = QueuedItem::new(prompt, role, class)
            .with_priority(options.priority.unwrap_or_default())
            .with_skip_follow_up(options.skip_follow_up)
            .with_completion(completion);

        {
            let mut state = self.shared.state();
            if !options.skip_follow_up {
                item = item.with_conversation(state.conversations.start());
            }
            tracing::debug!(
                "Submitted {} from {} to {} ({:?}, {:?})",
                item.id,
                role,
                item.target,
                item.priority,
                item.class
            );
            state.queue.enqueue(item)?;
        }

        self.shared.wake();
        settled.await.map_err(|_| Error::Closed)?
    }

    /// Install push channels for both agents.
    pub fn register_channels(
        &self,
        channel_a: Arc<dyn PushChannel>,
        channel_b: Arc<dyn PushChannel>,
    ) -> Result<()> {
        self.shared.strategy.register_channels(Channels {
            a: channel_a,
            b: channel_b,
        })
    }

    /// Feed an inbound agent reply to the strategy. Returns whether it matched a
    /// pending send.
    pub fn on_agent_response(&self, role: Role, text: &str) -> bool {
        match role.agent() {
            Some(agent) => self.shared.strategy.on_agent_response(agent, text),
            None => {
                tracing::debug!("Ignoring response from non-agent role {}", role);
                false
            }
        }
    }

    /// Start the prompt loop, or return the handle of the one already running.
    pub fn start_loop(&self, initial_prompt: Option<String>, options: LoopOptions) -> LoopHandle {
        let mut schedule = self
            .shared
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = schedule.as_ref().filter(|h| !h.is_stopped()) {
            tracing::warn!("Prompt loop already running");
            return handle.clone();
        }

        let handle = LoopScheduler::new(self.downgrade(), options).start(initial_prompt);
        *schedule = Some(handle.clone());
        handle
    }

    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state().queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.shared.state().queue.stats()
    }

    pub fn active_conversations(&self) -> usize {
        self.shared.state().conversations.active_count()
    }

    /// Whether the consumer is currently draining the queue.
    pub fn is_processing(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.shared.strategy.kind()
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a consumer unless one is already draining.
    fn wake(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.state().queue.dequeue_next();
            match next {
                Some(item) => self.process(item).await,
                None => {
                    self.running.store(false, Ordering::Release);
                    // A submit may have enqueued between the empty dequeue and the store.
                    if self.state().queue.is_empty()
                        || self
                            .running
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    async fn process(&self, item: QueuedItem) {
        self.announce(&item);

        let pending = self.ui.begin_pending(item.target.role());
        let result = self.strategy.send(&item).await;
        self.ui.end_pending(pending);

        match result {
            Ok(Some(reply)) if !reply.text.trim().is_empty() => {
                self.ui
                    .append_message(UiMessage::new(reply.responder_role(), reply.text.clone()));

                let mut state = self.state();
                match state.conversations.on_reply(&item, &reply) {
                    Advance::FollowUp(follow_up) => {
                        if let Err(e) = state.queue.enqueue(follow_up) {
                            tracing::error!("Failed to queue follow-up: {}", e);
                        }
                    }
                    Advance::Complete => {
                        tracing::info!(kind = "system", "Conversation complete");
                    }
                    Advance::Untracked => {}
                }
                drop(state);

                item.completion.resolve(Some(reply));
            }
            Ok(reply) => {
                self.end_conversation(&item);
                item.completion.resolve(reply);
            }
            Err(error) => match self.retry.on_failure(item, error) {
                RetryDecision::Retry(retry) => {
                    if let Err(e) = self.state().queue.enqueue(retry) {
                        tracing::error!("Failed to queue retry: {}", e);
                    }
                }
                RetryDecision::Fail(item, error) => {
                    self.end_conversation(&item);
                    if error.is_timeout() {
                        self.ui.append_message(UiMessage::new(
                            Role::System,
                            format!("{}: No reply (timeout)", item.target),
                        ));
                    }
                    tracing::error!("Delivery of {} failed: {}", item.id, error);
                    item.completion.reject(error);
                }
            },
        }
    }

    /// Echo fresh top-level system prompts to the UI, once per dedup window.
    fn announce(&self, item: &QueuedItem) {
        if item.role != Role::System || item.is_informational() || item.retry_count > 0 {
            return;
        }
        if self.quiet_markers.iter().any(|m| item.prompt.contains(m.as_str())) {
            tracing::debug!("Telemetry broadcast {} not announced", item.id);
            return;
        }

        let fresh = {
            let mut state = self.state();
            if state.conversations.depth_of(item) != 0 {
                return;
            }
            state.dedup.observe(&item.prompt)
        };

        if fresh {
            self.ui
                .append_message(UiMessage::new(Role::System, item.prompt.clone()));
        } else {
            tracing::debug!("Suppressed duplicate announcement for {}", item.id);
        }
    }

    fn end_conversation(&self, item: &QueuedItem) {
        if let Some(id) = item.conversation_id.as_deref() {
            if self.state().conversations.discard(id) {
                tracing::debug!("Conversation {} discarded", id);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self
            .schedule
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.stop();
        }

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for item in state.queue.drain() {
            item.completion.reject(Error::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Agent, Priority, ResponseClass};
    use crate::delivery::Correlator;
    use crate::ui::PendingToken;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// What the scripted strategy does for the next send.
    enum Step {
        Reply(&'static str),
        Empty,
        Timeout,
    }

    #[derive(Debug, Clone)]
    struct Sent {
        prompt: String,
        target: Agent,
        priority: Priority,
        retry_count: u32,
        skip_follow_up: bool,
    }

    /// Replies "reply to <prompt>" from the target unless a step is scripted.
    #[derive(Default)]
    struct ScriptedStrategy {
        steps: Mutex<VecDeque<Step>>,
        sent: Mutex<Vec<Sent>>,
    }

    impl ScriptedStrategy {
        fn with_steps(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                sent: Mutex::default(),
            })
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryStrategy for ScriptedStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Poller
        }

        async fn send(&self, item: &QueuedItem) -> Result<Option<AgentReply>> {
            self.sent.lock().unwrap().push(Sent {
                prompt: item.prompt.clone(),
                target: item.target,
                priority: item.priority,
                retry_count: item.retry_count,
                skip_follow_up: item.skip_follow_up,
            });
            tokio::task::yield_now().await;

            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(Some(AgentReply::new(text, item.target))),
                Some(Step::Empty) => Ok(None),
                Some(Step::Timeout) => Err(Error::ResponseTimeout {
                    responder: item.target,
                    waited: Duration::from_secs(1),
                }),
                None => Ok(Some(AgentReply::new(
                    format!("reply to {}", item.prompt),
                    item.target,
                ))),
            }
        }
    }

    #[derive(Default)]
    struct RecordingUi {
        messages: Mutex<Vec<UiMessage>>,
        pending: Mutex<Vec<Role>>,
    }

    impl RecordingUi {
        fn texts(&self, role: Role) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.text.clone())
                .collect()
        }
    }

    impl UiSink for RecordingUi {
        fn append_message(&self, message: UiMessage) {
            self.messages.lock().unwrap().push(message);
        }

        fn begin_pending(&self, role: Role) -> PendingToken {
            let mut pending = self.pending.lock().unwrap();
            pending.push(role);
            PendingToken(pending.len() as u64)
        }

        fn end_pending(&self, _token: PendingToken) {}
    }

    fn dispatcher(strategy: Arc<dyn DeliveryStrategy>, ui: Arc<RecordingUi>) -> Dispatcher {
        Dispatcher::new(strategy, ui, DispatcherConfig::default())
    }

    async fn settle(dispatcher: &Dispatcher) {
        while dispatcher.is_processing() || dispatcher.pending_len() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_without_follow_up() {
        let strategy = Arc::new(ScriptedStrategy::default());
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(strategy.clone(), ui);

        let reply = dispatcher
            .submit("ping", Role::System, SubmitOptions::with_priority(Priority::Low).no_follow_up())
            .await
            .unwrap()
            .unwrap();
        settle(&dispatcher).await;

        assert_eq!(reply, AgentReply::new("reply to ping", Agent::A));
        assert_eq!(strategy.sent().len(), 1);
        assert_eq!(dispatcher.active_conversations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_escalates_then_closes() {
        crate::logging::init_test();
        let strategy = ScriptedStrategy::with_steps(vec![
            Step::Reply("I am Skysent"),
            Step::Reply("Nice to meet you"),
            Step::Reply("Farewell"),
        ]);
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(strategy.clone(), ui.clone());

        let reply = dispatcher
            .submit("start", Role::System, SubmitOptions::with_priority(Priority::High))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.text, "I am Skysent");
        settle(&dispatcher).await;

        let sent = strategy.sent();
        assert_eq!(sent.len(), 3);

        assert_eq!(sent[0].target, Agent::A);

        assert_eq!(sent[1].target, Agent::B);
        assert_eq!(sent[1].priority, Priority::Normal);
        assert!(!sent[1].skip_follow_up);
        assert_eq!(
            sent[1].prompt,
            "Arcadius, Skysent said: \"I am Skysent...\" Your response?"
        );

        assert_eq!(sent[2].target, Agent::A);
        assert_eq!(sent[2].priority, Priority::High);
        assert!(sent[2].skip_follow_up);
        assert!(sent[2].prompt.contains("Give your final response."));

        assert_eq!(dispatcher.active_conversations(), 0);
        assert_eq!(ui.texts(Role::AgentA), ["I am Skysent", "Farewell"]);
        assert_eq!(ui.texts(Role::AgentB), ["Nice to meet you"]);
        assert_eq!(*ui.pending.lock().unwrap(), [Role::AgentA, Role::AgentB, Role::AgentA]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retried_once_then_rejected() {
        let channel = Arc::new(CountingChannel::default());
        let correlator = Arc::new(Correlator::new(TimeoutPolicy::default()));
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(correlator.clone(), ui.clone());
        dispatcher
            .register_channels(channel.clone(), Arc::new(CountingChannel::default()))
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = dispatcher
            .submit("Are you there?", Role::System, SubmitOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(Error::ResponseTimeout {
                responder: Agent::A,
                ..
            })
        ));
        assert!(started.elapsed() >= Duration::from_secs(360));
        assert_eq!(*channel.sends.lock().unwrap(), 2);
        assert!(correlator.registry().is_empty());
        assert_eq!(dispatcher.active_conversations(), 0);
        assert_eq!(
            ui.texts(Role::System),
            ["Are you there?", "agent-a: No reply (timeout)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_escalates_priority() {
        let strategy = ScriptedStrategy::with_steps(vec![Step::Timeout, Step::Reply("late")]);
        let dispatcher = dispatcher(strategy.clone(), Arc::default());

        let reply = dispatcher
            .submit("hello", Role::System, SubmitOptions::default().no_follow_up())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.text, "late");

        let sent = strategy.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].retry_count, 0);
        assert_eq!(sent[1].retry_count, 1);
        assert_eq!(sent[1].priority, Priority::Urgent);
        assert_eq!(sent[1].prompt, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_broadcast_echoed_once() {
        let strategy = Arc::new(ScriptedStrategy::default());
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(strategy.clone(), ui.clone());

        let options = SubmitOptions::default().no_follow_up();
        let (first, second) = tokio::join!(
            dispatcher.submit("Market is up", Role::System, options.clone()),
            dispatcher.submit("Market  is up ", Role::System, options.clone()),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(strategy.sent().len(), 2);
        assert_eq!(ui.texts(Role::System), ["Market is up"]);

        // Outside the window the same text is announced again.
        tokio::time::advance(Duration::from_secs(6)).await;
        dispatcher
            .submit("Market is up", Role::System, options)
            .await
            .unwrap();
        assert_eq!(ui.texts(Role::System).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_ends_conversation() {
        let strategy = ScriptedStrategy::with_steps(vec![Step::Empty]);
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(strategy.clone(), ui.clone());

        let reply = dispatcher
            .submit("📊 Wallet Update: 3 SOL", Role::System, SubmitOptions::default())
            .await
            .unwrap();
        settle(&dispatcher).await;

        assert!(reply.is_none());
        assert_eq!(strategy.sent().len(), 1);
        assert_eq!(dispatcher.active_conversations(), 0);
        // Informational prompts are not echoed.
        assert!(ui.texts(Role::System).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_report_is_quiet_but_conversational() {
        let strategy = ScriptedStrategy::with_steps(vec![Step::Empty]);
        let ui = Arc::new(RecordingUi::default());
        let dispatcher = dispatcher(strategy.clone(), ui.clone());

        let prompt = "Reporting wallet balance: 4 SOL";
        assert_eq!(
            dispatcher.shared.timeouts.classify(prompt),
            ResponseClass::Conversational
        );

        dispatcher
            .submit(prompt, Role::System, SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(strategy.sent().len(), 1);
        assert!(ui.texts(Role::System).is_empty());
    }

    #[tokio::test]
    async fn test_transport_not_ready_is_not_retried() {
        let correlator = Arc::new(Correlator::new(TimeoutPolicy::default()));
        let dispatcher = dispatcher(correlator, Arc::default());

        let result = dispatcher
            .submit("hello", Role::ExternalFeed, SubmitOptions::default())
            .await;
        assert!(matches!(result, Err(Error::TransportNotReady(Agent::A))));
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_response_routing() {
        let correlator = Arc::new(Correlator::new(TimeoutPolicy::default()));
        let dispatcher = dispatcher(correlator.clone(), Arc::default());
        dispatcher
            .register_channels(
                Arc::new(CountingChannel::default()),
                Arc::new(CountingChannel::default()),
            )
            .unwrap();

        assert!(!dispatcher.on_agent_response(Role::System, "noise"));

        let submitting = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit("hi", Role::System, SubmitOptions::default().no_follow_up())
                    .await
            })
        };
        while correlator.registry().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(!dispatcher.on_agent_response(Role::AgentB, "not me"));
        assert!(dispatcher.on_agent_response(Role::AgentA, "hello back"));

        let reply = submitting.await.unwrap().unwrap().unwrap();
        assert_eq!(reply, AgentReply::new("hello back", Agent::A));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_dispatcher_stops_loop() {
        let strategy = ScriptedStrategy::with_steps(Vec::new());
        let dispatcher = dispatcher(strategy.clone(), Arc::default());
        let weak = dispatcher.downgrade();

        let handle = dispatcher.start_loop(
            None,
            LoopOptions {
                interval: Duration::from_secs(1),
                prompts: Some(vec!["ping".to_string()]),
            },
        );
        drop(dispatcher);

        assert!(weak.upgrade().is_none());
        assert!(handle.is_stopped());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(strategy.sent().is_empty());
    }

    #[derive(Default)]
    struct CountingChannel {
        sends: Mutex<usize>,
    }

    #[async_trait]
    impl PushChannel for CountingChannel {
        async fn send(&self, _text: &str) -> Result<()> {
            *self.sends.lock().unwrap() += 1;
            Ok(())
        }
    }
}
