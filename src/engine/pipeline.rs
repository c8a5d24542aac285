// ZapLine Engine — Pipeline Orchestrator
//
// One instance of the state machine runs per inbound webhook event:
//
//   Received → Admitted|RateLimited → QuotaChecked|QuotaExceeded
//            → Generated|GenerationFailed → Delivered|DeliveryFailed
//
// Own-account messages and bodiless envelopes are discarded before Received.
// Every stage boundary is caught and logged with the conversation key; one
// failed conversation never takes down another.
//
// There is deliberately no per-conversation mutex: correctness of the rate
// window and the log under concurrent events for the same key rests on the
// store's atomic operations, and reply ordering across two near-simultaneous
// inbound messages from the same contact is not guaranteed.

use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::atoms::constants::{
    CHARS_PER_TOKEN, HISTORY_LIMIT, RATE_LIMIT_NOTICE, RATE_WINDOW_SECS, RETRIEVAL_TOP_K,
};
use crate::atoms::traits::{ChatTransport, KnowledgeSource, ModelProvider, UsageLedger};
use crate::atoms::types::{
    AgentProfile, ConversationKey, InboundMessage, PromptMessage, Role, ScoredMatch,
};
use crate::engine::dispatcher::{self, Pacing};
use crate::engine::store::SharedStore;
use crate::engine::{knowledge, memory, ratelimit, segmenter};

// ── Policy ─────────────────────────────────────────────────────────────────

/// Availability-over-strictness switches and tuning, with defaults matching
/// the observed production behavior.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    /// Admit messages when the shared store is unreachable.
    pub fail_open_on_store_error: bool,
    /// Send the profile's fallback text when generation fails. The source
    /// design stays silent here (unlike the quota and rate-limit paths);
    /// kept as the default, switchable for deployments that want symmetry.
    pub fallback_on_generation_failure: bool,
    pub history_limit: usize,
    pub retrieval_top_k: usize,
    pub pacing: Pacing,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        PipelinePolicy {
            fail_open_on_store_error: true,
            fallback_on_generation_failure: false,
            history_limit: HISTORY_LIMIT,
            retrieval_top_k: RETRIEVAL_TOP_K,
            pacing: Pacing::default(),
        }
    }
}

/// Terminal state of one event's run through the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Own message or empty body — dropped before Received.
    Discarded,
    RateLimited,
    QuotaExceeded,
    GenerationFailed,
    Delivered { chunks: usize },
    DeliveryFailed,
}

// ── Pipeline ───────────────────────────────────────────────────────────────

pub struct Pipeline {
    store: Arc<dyn SharedStore>,
    transport: Arc<dyn ChatTransport>,
    model: Arc<dyn ModelProvider>,
    knowledge: Arc<dyn KnowledgeSource>,
    ledger: Arc<dyn UsageLedger>,
    policy: PipelinePolicy,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn SharedStore>,
        transport: Arc<dyn ChatTransport>,
        model: Arc<dyn ModelProvider>,
        knowledge: Arc<dyn KnowledgeSource>,
        ledger: Arc<dyn UsageLedger>,
        policy: PipelinePolicy,
    ) -> Self {
        Pipeline { store, transport, model, knowledge, ledger, policy }
    }

    /// Run one inbound event through the state machine.
    pub async fn handle(&self, profile: &AgentProfile, event: &InboundMessage) -> PipelineOutcome {
        if event.from_me || event.text.trim().is_empty() {
            return PipelineOutcome::Discarded;
        }

        let key = ConversationKey::new(&profile.agent_id, &event.contact_id);
        debug!(
            "[pipeline] Received {} from {} ({} chars)",
            event.message_id,
            key,
            event.text.chars().count()
        );

        // ── Admission ──────────────────────────────────────────────────
        let admission = ratelimit::admit(
            self.store.as_ref(),
            &key,
            profile.messages_per_minute,
            RATE_WINDOW_SECS,
            self.policy.fail_open_on_store_error,
        )
        .await;

        if !admission.allowed {
            info!("[pipeline] Rate limited {} (window resets at {})", key, admission.reset_at_ms);
            self.send_notice(profile, &event.remote_jid, RATE_LIMIT_NOTICE).await;
            return PipelineOutcome::RateLimited;
        }

        // ── Quota gate ─────────────────────────────────────────────────
        let estimated =
            (event.text.chars().count() / CHARS_PER_TOKEN) as u32 + profile.max_tokens;
        match self.ledger.check_and_reserve(&profile.owner_id, estimated).await {
            Ok(true) => {}
            Ok(false) => {
                info!("[pipeline] Quota exhausted for owner {} on {}", profile.owner_id, key);
                self.send_notice(profile, &event.remote_jid, &profile.fallback_text).await;
                return PipelineOutcome::QuotaExceeded;
            }
            Err(e) => {
                // Accounting fault, not an overdraft — availability wins.
                warn!("[pipeline] Quota check failed for {} — proceeding: {}", profile.owner_id, e);
            }
        }

        // ── Context assembly ───────────────────────────────────────────
        let history = memory::recent(self.store.as_ref(), &key, self.policy.history_limit).await;

        let pool = match self.knowledge.chunks_for_agent(&profile.agent_id).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!("[pipeline] Knowledge fetch failed for {} — replying without it: {}", key, e);
                vec![]
            }
        };
        let matches = knowledge::search(&pool, &event.text, self.policy.retrieval_top_k);
        if let Some(best) = matches.first() {
            debug!(
                "[pipeline] Top knowledge match for {}: '{}' (score {}, {:?})",
                key, best.chunk.title, best.score, best.matched_on
            );
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::new(Role::System, compose_system_prompt(profile, &matches)));
        for m in &history {
            messages.push(PromptMessage::new(m.role, m.content.clone()));
        }
        messages.push(PromptMessage::new(Role::User, event.text.clone()));

        // ── Generation ─────────────────────────────────────────────────
        let completion = match self
            .model
            .complete(&profile.model, &messages, profile.max_tokens, profile.temperature)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!("[pipeline] Generation failed for {}: {}", key, e);
                if self.policy.fallback_on_generation_failure {
                    self.send_notice(profile, &event.remote_jid, &profile.fallback_text).await;
                }
                return PipelineOutcome::GenerationFailed;
            }
        };

        // Optimistic commit: the exchange enters memory before delivery is
        // confirmed, and is not rolled back if delivery fails.
        let inbound_tokens = ((event.text.chars().count() / CHARS_PER_TOKEN) as u32).max(1);
        if let Err(e) =
            memory::append(self.store.as_ref(), &key, Role::User, &event.text, inbound_tokens).await
        {
            warn!("[pipeline] Failed to record inbound message for {}: {}", key, e);
        }
        if let Err(e) = memory::append(
            self.store.as_ref(),
            &key,
            Role::Assistant,
            &completion.text,
            completion.total_tokens,
        )
        .await
        {
            warn!("[pipeline] Failed to record reply for {}: {}", key, e);
        }
        if let Err(e) = self.ledger.commit(&profile.owner_id, completion.total_tokens).await {
            warn!("[pipeline] Usage commit failed for owner {}: {}", profile.owner_id, e);
        }

        // ── Delivery ───────────────────────────────────────────────────
        let segments = segmenter::segment(&completion.text);
        if segments.is_empty() {
            warn!("[pipeline] Empty reply for {} — nothing to deliver", key);
            return PipelineOutcome::Delivered { chunks: 0 };
        }

        match dispatcher::deliver(
            self.transport.as_ref(),
            &profile.instance,
            &event.remote_jid,
            &segments,
            &self.policy.pacing,
        )
        .await
        {
            Ok(report) => {
                info!("[pipeline] Delivered {} chunk(s) to {}", report.delivered, key);
                PipelineOutcome::Delivered { chunks: report.delivered }
            }
            Err(e) => {
                error!("[pipeline] Delivery failed for {}: {}", key, e);
                PipelineOutcome::DeliveryFailed
            }
        }
    }

    /// Canned single-chunk reply (rate-limit notice, fallback text) — goes
    /// straight to the dispatcher, bypassing the segmenter.
    async fn send_notice(&self, profile: &AgentProfile, destination: &str, text: &str) {
        let chunks = vec![text.to_string()];
        if let Err(e) = dispatcher::deliver(
            self.transport.as_ref(),
            &profile.instance,
            destination,
            &chunks,
            &self.policy.pacing,
        )
        .await
        {
            warn!("[pipeline] Notice delivery to {} failed: {}", destination, e);
        }
    }
}

// ── Prompt assembly ────────────────────────────────────────────────────────

/// Persona prompt plus the retrieved reference material. Thin glue — the
/// interesting decisions live in retrieval and memory.
fn compose_system_prompt(profile: &AgentProfile, matches: &[ScoredMatch]) -> String {
    let mut prompt = if profile.system_prompt.trim().is_empty() {
        format!(
            "Você é {}, atendendo clientes pelo WhatsApp. Responda de forma curta, natural e útil.",
            profile.persona_name
        )
    } else {
        profile.system_prompt.clone()
    };

    if !matches.is_empty() {
        prompt.push_str("\n\n## Material de referência\n");
        prompt.push_str("Use o material abaixo quando ajudar a responder:\n");
        for m in matches {
            prompt.push_str(&format!("\n### {}\n{}\n", m.chunk.title, m.chunk.content));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::{EngineResult, TransportError};
    use crate::atoms::types::{ChunkKind, Completion, DeliveryAck, KnowledgeChunk, Presence};
    use crate::engine::store::testing::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    // ── Stub collaborators ─────────────────────────────────────────────

    #[derive(Default)]
    struct StubTransport {
        sends: Mutex<Vec<String>>,
        presences: Mutex<Vec<Presence>>,
        failures: Mutex<VecDeque<TransportError>>,
    }

    #[async_trait]
    impl ChatTransport for StubTransport {
        async fn send_text(
            &self,
            _session: &str,
            _destination: &str,
            text: &str,
            _delay_hint_ms: u64,
        ) -> Result<DeliveryAck, TransportError> {
            match self.failures.lock().pop_front() {
                Some(err) => Err(err),
                None => {
                    self.sends.lock().push(text.to_string());
                    Ok(DeliveryAck { message_id: "ack".into() })
                }
            }
        }

        async fn set_presence(
            &self,
            _session: &str,
            _destination: &str,
            presence: Presence,
        ) -> Result<(), TransportError> {
            self.presences.lock().push(presence);
            Ok(())
        }
    }

    struct StubModel {
        reply: EngineResult<Completion>,
        requests: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl StubModel {
        fn replying(text: &str, tokens: u32) -> Self {
            StubModel {
                reply: Ok(Completion { text: text.into(), total_tokens: tokens }),
                requests: Mutex::new(vec![]),
            }
        }

        fn failing() -> Self {
            StubModel {
                reply: Err(crate::atoms::error::EngineError::provider("stub", "boom")),
                requests: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for StubModel {
        async fn complete(
            &self,
            _model: &str,
            messages: &[PromptMessage],
            _max_tokens: u32,
            _temperature: f32,
        ) -> EngineResult<Completion> {
            self.requests.lock().push(messages.to_vec());
            match &self.reply {
                Ok(c) => Ok(c.clone()),
                Err(_) => Err(crate::atoms::error::EngineError::provider("stub", "boom")),
            }
        }
    }

    struct StubKnowledge(Vec<KnowledgeChunk>);

    #[async_trait]
    impl KnowledgeSource for StubKnowledge {
        async fn chunks_for_agent(&self, _agent_id: &str) -> EngineResult<Vec<KnowledgeChunk>> {
            Ok(self.0.clone())
        }
    }

    struct DenyLedger;

    #[async_trait]
    impl UsageLedger for DenyLedger {
        async fn check_and_reserve(&self, _o: &str, _t: u32) -> EngineResult<bool> {
            Ok(false)
        }
        async fn commit(&self, _o: &str, _t: u32) -> EngineResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLedger {
        committed: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl UsageLedger for RecordingLedger {
        async fn check_and_reserve(&self, _o: &str, _t: u32) -> EngineResult<bool> {
            Ok(true)
        }
        async fn commit(&self, _o: &str, tokens: u32) -> EngineResult<()> {
            self.committed.lock().push(tokens);
            Ok(())
        }
    }

    // ── Fixtures ───────────────────────────────────────────────────────

    fn profile() -> AgentProfile {
        AgentProfile {
            agent_id: "agent-1".into(),
            owner_id: "owner-1".into(),
            instance: "inst".into(),
            messages_per_minute: 10,
            ..AgentProfile::default()
        }
    }

    fn event(text: &str) -> InboundMessage {
        InboundMessage {
            message_id: "MSG-1".into(),
            remote_jid: "5511999990000@s.whatsapp.net".into(),
            contact_id: "5511999990000".into(),
            push_name: "Maria".into(),
            text: text.into(),
            from_me: false,
        }
    }

    fn greeting_chunk() -> KnowledgeChunk {
        KnowledgeChunk {
            id: "k1".into(),
            title: "olá".into(),
            content: "Bem-vindo!".into(),
            kind: ChunkKind::Script,
            priority: 1,
            tags: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    struct World {
        store: Arc<InMemoryStore>,
        transport: Arc<StubTransport>,
        model: Arc<StubModel>,
        ledger: Arc<RecordingLedger>,
        pipeline: Pipeline,
    }

    fn world(model: StubModel, chunks: Vec<KnowledgeChunk>, policy: PipelinePolicy) -> World {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(StubTransport::default());
        let model = Arc::new(model);
        let ledger = Arc::new(RecordingLedger::default());
        let pipeline = Pipeline::new(
            store.clone(),
            transport.clone(),
            model.clone(),
            Arc::new(StubKnowledge(chunks)),
            ledger.clone(),
            policy,
        );
        World { store, transport, model, ledger, pipeline }
    }

    fn quiet_policy() -> PipelinePolicy {
        PipelinePolicy { pacing: Pacing::immediate(), ..PipelinePolicy::default() }
    }

    // ── Scenarios ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn greeting_flows_end_to_end() {
        let w = world(
            StubModel::replying("Oi! Como posso ajudar?", 42),
            vec![greeting_chunk()],
            quiet_policy(),
        );

        // Retrieval puts the greeting chunk first with containment + priority.
        let matches = knowledge::search(&[greeting_chunk()], "olá", 3);
        assert!(matches[0].score >= 105);

        let outcome = w.pipeline.handle(&profile(), &event("olá")).await;
        assert_eq!(outcome, PipelineOutcome::Delivered { chunks: 1 });

        // Exactly one chunk of the stub reply, framed by one composing and
        // one paused signal.
        assert_eq!(*w.transport.sends.lock(), vec!["Oi! Como posso ajudar?"]);
        assert_eq!(*w.transport.presences.lock(), vec![Presence::Composing, Presence::Paused]);

        // The retrieved chunk made it into the system prompt.
        let requests = w.model.requests.lock();
        let system = &requests[0][0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("Bem-vindo!"));

        // Both sides of the exchange are in memory, oldest first.
        let key = ConversationKey::new("agent-1", "5511999990000");
        let log = memory::recent(w.store.as_ref(), &key, 10).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::User);
        assert_eq!(log[0].content, "olá");
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[1].token_count, 42);

        // Usage committed with the provider-reported count.
        assert_eq!(*w.ledger.committed.lock(), vec![42]);
    }

    #[tokio::test]
    async fn history_is_replayed_chronologically_in_the_prompt() {
        let w = world(StubModel::replying("claro!", 10), vec![], quiet_policy());
        let key = ConversationKey::new("agent-1", "5511999990000");
        memory::append(w.store.as_ref(), &key, Role::User, "qual o preço?", 3).await.unwrap();
        memory::append(w.store.as_ref(), &key, Role::Assistant, "R$ 99 por mês.", 5).await.unwrap();

        w.pipeline.handle(&profile(), &event("tem desconto?")).await;

        let requests = w.model.requests.lock();
        let messages = &requests[0];
        assert_eq!(messages.len(), 4); // system + 2 history + current
        assert_eq!(messages[1].content, "qual o preço?");
        assert_eq!(messages[2].content, "R$ 99 por mês.");
        assert_eq!(messages[3].content, "tem desconto?");
    }

    #[tokio::test]
    async fn rate_limited_contact_gets_the_fixed_notice() {
        let w = world(StubModel::replying("oi", 5), vec![], quiet_policy());
        let mut p = profile();
        p.messages_per_minute = 1;

        assert!(matches!(
            w.pipeline.handle(&p, &event("primeira")).await,
            PipelineOutcome::Delivered { .. }
        ));
        let outcome = w.pipeline.handle(&p, &event("segunda")).await;
        assert_eq!(outcome, PipelineOutcome::RateLimited);

        let sends = w.transport.sends.lock();
        assert_eq!(sends.last().unwrap(), RATE_LIMIT_NOTICE);
        // The rejected message never reached the model.
        assert_eq!(w.model.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_quota_sends_the_fallback_and_halts() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(StubTransport::default());
        let model = Arc::new(StubModel::replying("oi", 5));
        let pipeline = Pipeline::new(
            store.clone(),
            transport.clone(),
            model.clone(),
            Arc::new(StubKnowledge(vec![])),
            Arc::new(DenyLedger),
            quiet_policy(),
        );

        let outcome = pipeline.handle(&profile(), &event("olá")).await;
        assert_eq!(outcome, PipelineOutcome::QuotaExceeded);
        assert_eq!(*transport.sends.lock(), vec![profile().fallback_text]);
        assert!(model.requests.lock().is_empty());

        // Nothing was committed to memory.
        let key = ConversationKey::new("agent-1", "5511999990000");
        assert!(memory::recent(store.as_ref(), &key, 10).await.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_is_silent_by_default() {
        let w = world(StubModel::failing(), vec![], quiet_policy());

        let outcome = w.pipeline.handle(&profile(), &event("olá")).await;
        assert_eq!(outcome, PipelineOutcome::GenerationFailed);
        assert!(w.transport.sends.lock().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_sends_fallback_when_configured() {
        let policy = PipelinePolicy {
            fallback_on_generation_failure: true,
            ..quiet_policy()
        };
        let w = world(StubModel::failing(), vec![], policy);

        let outcome = w.pipeline.handle(&profile(), &event("olá")).await;
        assert_eq!(outcome, PipelineOutcome::GenerationFailed);
        assert_eq!(*w.transport.sends.lock(), vec![profile().fallback_text]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_keeps_the_optimistic_memory_commit() {
        let w = world(StubModel::replying("resposta", 7), vec![], quiet_policy());
        *w.transport.failures.lock() = vec![
            TransportError::Status { status: 500, body: String::new() },
            TransportError::Status { status: 500, body: String::new() },
            TransportError::Status { status: 500, body: String::new() },
        ]
        .into();

        let outcome = w.pipeline.handle(&profile(), &event("olá")).await;
        assert_eq!(outcome, PipelineOutcome::DeliveryFailed);

        // The assistant "said it" as far as memory is concerned.
        let key = ConversationKey::new("agent-1", "5511999990000");
        assert_eq!(memory::recent(w.store.as_ref(), &key, 10).await.len(), 2);
    }

    #[tokio::test]
    async fn own_messages_and_empty_bodies_are_discarded() {
        let w = world(StubModel::replying("oi", 5), vec![], quiet_policy());

        let mut own = event("olá");
        own.from_me = true;
        assert_eq!(w.pipeline.handle(&profile(), &own).await, PipelineOutcome::Discarded);

        assert_eq!(
            w.pipeline.handle(&profile(), &event("   ")).await,
            PipelineOutcome::Discarded
        );
        assert!(w.transport.sends.lock().is_empty());
    }

    #[test]
    fn prompt_without_matches_has_no_reference_section() {
        let prompt = compose_system_prompt(&profile(), &[]);
        assert!(!prompt.contains("Material de referência"));
    }
}
