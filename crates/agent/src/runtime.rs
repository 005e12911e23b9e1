use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::{
    AgentConfig, AgentState, AgentStatus, Decision, Error, MessageDraft, Participant, Result,
};
use parley_storage::WorkingMemory;
use parley_transports::{RetrieveQuery, Transport};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::{AgentIdentity, ContextSnapshot};
use crate::generator::{ContentGenerator, PlaceholderGenerator};
use crate::metrics::calculate_metrics;

const HOUR_MS: i64 = 3_600_000;
/// Memory occupancy bounds of the adaptive-polling hysteresis band.
const BUSY_OCCUPANCY: usize = 50;
const QUIET_OCCUPANCY: usize = 10;

enum Control {
    Pause,
    Resume,
    Stop,
}

/// The autonomous agent orchestrator. Owns a private working memory and
/// state record and drives the observe, think, act, learn, adapt loop on
/// a single tokio task, so at most one tick is ever in flight.
pub struct Agent {
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    generator: Arc<dyn ContentGenerator>,
    memory: Mutex<WorkingMemory>,
    state: RwLock<AgentState>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Arc<Self> {
        let memory = WorkingMemory::new(
            config.memory.max_entries,
            Duration::from_secs(config.memory.max_age_secs),
        );
        let state = AgentState::new(config.polling.min_interval_ms);
        Arc::new(Self {
            config,
            transport,
            generator,
            memory: Mutex::new(memory),
            state: RwLock::new(state),
            control_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Construct with the built-in deterministic generator.
    pub fn with_placeholder(config: AgentConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let generator = Arc::new(PlaceholderGenerator::new(
            config.personality.formality,
            &config.personality.style,
        ));
        Self::new(config, transport, generator)
    }

    fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            agent_id: self.config.identity.agent_id.clone(),
            handle: self.config.identity.handle.clone(),
            display_name: self.config.identity.display_name.clone(),
        }
    }

    pub async fn state(&self) -> AgentState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> AgentStatus {
        self.state.read().await.status
    }

    /// Initialize the transport if necessary, mark the agent running and
    /// arm the first tick at the minimum polling interval. A transport
    /// failure sets the status to `Error` and propagates; the agent must
    /// then be reconstructed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.status != AgentStatus::Initializing {
                return Err(Error::InvalidState(format!(
                    "cannot start an agent in status '{}'",
                    state.status.as_str()
                )));
            }
        }

        if !self.transport.is_connected().await {
            if let Err(e) = self.transport.initialize().await {
                let mut state = self.state.write().await;
                state.status = AgentStatus::Error;
                state.errors += 1;
                error!(error = %e, "Transport initialization failed");
                return Err(e);
            }
        }

        {
            let mut state = self.state.write().await;
            state.status = AgentStatus::Running;
            state.started_at_ms = Some(Utc::now().timestamp_millis());
            state.polling_interval_ms = self.config.polling.min_interval_ms;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.control_tx.lock().await = Some(tx);
        let handle = tokio::spawn(self.clone().run_loop(rx));
        *self.task.lock().await = Some(handle);

        info!(
            agent = %self.config.identity.agent_id,
            transport = %self.transport.name(),
            interval_ms = self.config.polling.min_interval_ms,
            "Agent started"
        );
        Ok(())
    }

    /// Cancel the pending timer and halt the loop. An in-flight tick is
    /// allowed to finish; this call waits for the loop task to exit.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.status == AgentStatus::Stopped {
                return Ok(());
            }
            state.status = AgentStatus::Stopped;
        }
        if let Some(tx) = self.control_tx.lock().await.take() {
            let _ = tx.send(Control::Stop);
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!(agent = %self.config.identity.agent_id, "Agent stopped");
        Ok(())
    }

    /// Cancel the pending timer without tearing the loop down.
    pub async fn pause(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.status != AgentStatus::Running {
                return Err(Error::InvalidState(format!(
                    "cannot pause an agent in status '{}'",
                    state.status.as_str()
                )));
            }
            state.status = AgentStatus::Paused;
        }
        if let Some(tx) = self.control_tx.lock().await.as_ref() {
            let _ = tx.send(Control::Pause);
        }
        info!(agent = %self.config.identity.agent_id, "Agent paused");
        Ok(())
    }

    /// Re-arm the timer at the current adaptive interval. Only valid
    /// from `Paused`.
    pub async fn resume(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.status != AgentStatus::Paused {
                return Err(Error::InvalidState(format!(
                    "cannot resume an agent in status '{}'",
                    state.status.as_str()
                )));
            }
            state.status = AgentStatus::Running;
        }
        if let Some(tx) = self.control_tx.lock().await.as_ref() {
            let _ = tx.send(Control::Resume);
        }
        info!(agent = %self.config.identity.agent_id, "Agent resumed");
        Ok(())
    }

    /// Single-task loop: waits on the control channel and the tick timer
    /// at once. Ticks run inline and the next timer is armed only after
    /// the current tick completes, error path included, so the loop is
    /// self-healing and only `stop()` or `pause()` interrupt its cadence.
    async fn run_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Control>) {
        loop {
            let interval_ms = self.state.read().await.polling_interval_ms;
            let sleep = tokio::time::sleep(Duration::from_millis(interval_ms));
            tokio::pin!(sleep);

            tokio::select! {
                ctrl = rx.recv() => match ctrl {
                    Some(Control::Stop) | None => break,
                    Some(Control::Pause) => {
                        // The pending sleep is dropped here, which is the
                        // timer cancellation. Wait for a resume.
                        loop {
                            match rx.recv().await {
                                Some(Control::Resume) => break,
                                Some(Control::Pause) => continue,
                                Some(Control::Stop) | None => return,
                            }
                        }
                    }
                    Some(Control::Resume) => {}
                },
                _ = &mut sleep => {
                    if let Err(e) = self.tick().await {
                        let mut state = self.state.write().await;
                        state.errors += 1;
                        error!(error = %e, "Tick failed");
                    }
                }
            }
        }
        debug!(agent = %self.config.identity.agent_id, "Agent loop exited");
    }

    /// One observe, think, act, learn, adapt iteration.
    pub async fn tick(&self) -> Result<()> {
        let new_messages = self.observe().await;
        if new_messages == 0 {
            self.adapt().await;
            return Ok(());
        }

        let snapshot = self.snapshot().await;
        let decision = self.think(&snapshot).await;
        {
            let mut state = self.state.write().await;
            state.last_decision_ms = Some(Utc::now().timestamp_millis());
        }
        debug!(
            act = decision.is_act(),
            confidence = decision.confidence(),
            reasoning = %decision.reasoning(),
            "Decision made"
        );

        if let Decision::Act { content, .. } = &decision {
            self.act(content).await;
        }

        self.learn(&decision).await;
        self.adapt().await;
        Ok(())
    }

    /// Fetch messages newer than the last observed activity, deduplicate
    /// against memory and ingest the survivors. A transport failure is
    /// logged and treated as zero new messages.
    async fn observe(&self) -> usize {
        let since = self.state.read().await.last_activity_ms;
        let query = RetrieveQuery::new(
            &self.config.transport.conversation_id,
            Some(since),
            self.config.polling.batch_size,
        );
        let fetched = match self.transport.retrieve_messages(&query).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Retrieve failed; treating as no new messages");
                Vec::new()
            }
        };

        let mut newest = since;
        let mut ingested = 0usize;
        {
            let mut memory = self.memory.lock().await;
            for message in fetched {
                if memory.contains(&message.id) {
                    continue;
                }
                newest = newest.max(message.timestamp_ms);
                memory.add(message);
                ingested += 1;
            }
        }
        if ingested > 0 {
            let mut state = self.state.write().await;
            state.messages_received += ingested as u64;
            state.last_activity_ms = newest;
            debug!(count = ingested, "Ingested new messages");
        }
        ingested
    }

    async fn snapshot(&self) -> ContextSnapshot {
        let participants: HashMap<String, Participant> = match self
            .transport
            .participants(&self.config.transport.conversation_id)
            .await
        {
            Ok(list) => list.into_iter().map(|p| (p.id.clone(), p)).collect(),
            Err(e) => {
                warn!(error = %e, "Participant fetch failed; scoring without a roster");
                HashMap::new()
            }
        };
        let state = self.state.read().await.clone();
        let memory = self.memory.lock().await;
        ContextSnapshot::build(
            &memory,
            participants,
            self.identity(),
            state,
            self.config.polling.batch_size,
        )
    }

    /// Score the snapshot and decide. Confidence is the sum of the
    /// configured weights of every factor that holds, so it can exceed
    /// 1.0; the act threshold is a strict 0.5. Hitting the trailing-hour
    /// reply limit forces a wait regardless of the factors.
    async fn think(&self, snapshot: &ContextSnapshot) -> Decision {
        let metrics = calculate_metrics(snapshot);
        let now = Utc::now().timestamp_millis();

        let own_last_hour = snapshot
            .messages
            .iter()
            .filter(|m| snapshot.is_own_message(m) && now - m.timestamp_ms <= HOUR_MS)
            .count();
        if own_last_hour >= self.config.decision.max_replies_per_hour {
            return Decision::Wait {
                reasoning: format!(
                    "reply limit reached ({} own messages in the last hour)",
                    own_last_hour
                ),
                confidence: 0.0,
            };
        }

        let since = snapshot.state.last_decision_ms.unwrap_or(0);
        let candidates: Vec<_> = snapshot
            .messages
            .iter()
            .filter(|m| !snapshot.is_own_message(m) && m.timestamp_ms > since)
            .collect();

        let handle = self.config.identity.handle.trim_start_matches('@').to_lowercase();
        let mentioned = candidates
            .iter()
            .any(|m| m.content.to_lowercase().contains(&handle));
        let question = candidates.iter().any(|m| m.content.contains('?'));
        let low_density = metrics.density < self.config.targets.density;
        let low_quality = metrics.quality < self.config.targets.quality;

        let weights = &self.config.decision;
        let mut confidence = 0.0;
        let mut factors: Vec<&str> = Vec::new();
        if mentioned {
            confidence += weights.mention_weight;
            factors.push("mentioned");
        }
        if question {
            confidence += weights.question_weight;
            factors.push("question");
        }
        if low_density {
            confidence += weights.density_weight;
            factors.push("density below target");
        }
        if low_quality {
            confidence += weights.quality_weight;
            factors.push("quality below target");
        }

        let reasoning = if factors.is_empty() {
            "no factors present".to_string()
        } else {
            factors.join(", ")
        };

        if confidence > 0.5 {
            let content = match self.generator.generate(snapshot, &reasoning).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "Content generation failed; using fallback");
                    "I'm here and following along.".to_string()
                }
            };
            Decision::Act {
                content,
                reasoning,
                confidence,
            }
        } else {
            Decision::Wait {
                reasoning,
                confidence,
            }
        }
    }

    /// Publish the decided content. Failures are logged and counted,
    /// never escalated out of the tick.
    async fn act(&self, content: &str) {
        let draft = MessageDraft::new(&self.config.transport.conversation_id, content);
        match self.transport.publish_message(&draft).await {
            Ok(published) => {
                let mut memory = self.memory.lock().await;
                memory.add(published);
                drop(memory);
                let mut state = self.state.write().await;
                state.messages_sent += 1;
                info!(conversation = %draft.conversation_id, "Published message");
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.errors += 1;
                warn!(error = %e, "Publish failed");
            }
        }
    }

    /// Extension point for persisting decision outcomes. Intentionally a
    /// no-op in this engine.
    async fn learn(&self, _decision: &Decision) {}

    /// Recompute the polling interval from memory occupancy: busy
    /// conversations poll faster, quiet ones slower, with a hysteresis
    /// band in between to avoid oscillation.
    async fn adapt(&self) {
        let occupancy = self.memory.lock().await.len();
        let mut state = self.state.write().await;
        let current = state.polling_interval_ms;
        let next = if occupancy > BUSY_OCCUPANCY {
            ((current as f64 * 0.8) as u64).max(self.config.polling.min_interval_ms)
        } else if occupancy < QUIET_OCCUPANCY {
            ((current as f64 * 1.2) as u64).min(self.config.polling.max_interval_ms)
        } else {
            current
        };
        if next != current {
            debug!(occupancy, from_ms = current, to_ms = next, "Adapted polling interval");
            state.polling_interval_ms = next;
        }
    }
}
