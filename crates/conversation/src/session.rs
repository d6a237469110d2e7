use futures::StreamExt;
use shared::{ChatEvent, ChatMode, ChatSettings, Message, Step};
use tokio::sync::mpsc::UnboundedSender;
use transport::{decode_event_stream, ChatBackend, EventStream};

use crate::turn::{Reply, TransitionError, TurnInput, TurnState};

/// Change notifications for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged { loading: bool, show_steps: bool },
    /// Full snapshot of the working step buffer.
    StepsChanged(Vec<Step>),
    MessageAppended(Message),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,

    #[error("a turn is already in progress")]
    Busy,

    #[error("conversation view closed during the turn")]
    Detached,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One conversation: the append-only message log plus the in-flight turn.
///
/// `submit` takes `&mut self`, so at most one turn runs per session.
pub struct ChatSession<B> {
    backend: B,
    settings: ChatSettings,
    messages: Vec<Message>,
    state: TurnState,
    observer: Option<UnboundedSender<SessionUpdate>>,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, settings: ChatSettings) -> Self {
        let messages = settings.greeting.iter().map(|g| Message::bot(g.clone())).collect();
        Self {
            backend,
            settings,
            messages,
            state: TurnState::Idle,
            observer: None,
        }
    }

    /// Attach a presentation layer. Once its receiver is dropped, any turn in
    /// flight is abandoned at its next suspension point.
    pub fn with_observer(mut self, tx: UnboundedSender<SessionUpdate>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn show_steps(&self) -> bool {
        self.state.show_steps()
    }

    pub fn current_steps(&self) -> &[Step] {
        self.state.current_steps()
    }

    pub(crate) fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    /// Drop an interrupted turn (e.g. after its future was aborted) without
    /// appending anything.
    pub fn abandon_turn(&mut self) {
        if !self.state.is_idle() {
            tracing::debug!(state = self.state.name(), "abandoning turn");
            self.state = TurnState::Idle;
            self.notify_flags();
        }
    }

    /// Run one full turn and return the bot message it appended.
    ///
    /// Whatever happens, the session is back in `Idle` when this returns.
    pub async fn submit(&mut self, input: &str) -> Result<Message, SubmitError> {
        if input.trim().is_empty() {
            return Err(SubmitError::Empty);
        }
        if !self.state.is_idle() {
            return Err(SubmitError::Busy);
        }

        let with_steps = self.settings.mode == ChatMode::Sidebar;
        self.apply(TurnInput::Submit {
            prompt: input.to_string(),
            with_steps,
        })?;
        self.append(Message::user(input));

        let result = match self.settings.mode {
            ChatMode::Sidebar => self.run_sidebar(input).await,
            ChatMode::Simple => self.run_simple(input).await,
        };
        if result.is_err() {
            self.abandon_turn();
        }
        result
    }

    async fn run_sidebar(&mut self, prompt: &str) -> Result<Message, SubmitError> {
        if self.backend.supports_streaming() {
            if let Some(reply) = self.run_streaming(prompt).await? {
                return Ok(reply);
            }
        } else {
            tracing::debug!("streaming unsupported; using the blocking endpoint");
        }
        self.run_fallback(prompt).await
    }

    /// `Ok(None)` means the stream could not deliver a final frame and the
    /// caller should fall back.
    async fn run_streaming(&mut self, prompt: &str) -> Result<Option<Message>, SubmitError> {
        let bytes = match self.backend.open_stream(prompt).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.ensure_live()?;
                tracing::warn!(error = %e, "could not open stream; falling back");
                return Ok(None);
            }
        };
        self.ensure_live()?;
        self.apply(TurnInput::BeginStreaming)?;

        let mut events = decode_event_stream(bytes);
        while let Some(item) = events.next().await {
            self.ensure_live()?;
            match item {
                Ok(ChatEvent::Step(step)) => {
                    tracing::debug!(step = %step.name, status = step.status.as_str(), "step update");
                    self.apply(TurnInput::StepUpdate(step))?;
                }
                Ok(ChatEvent::Final { message }) => {
                    self.apply(TurnInput::Finish(Reply::Answer(message)))?;
                    let reply = self.commit()?;
                    // The turn is over; the server may still hold the stream open.
                    tokio::spawn(drain_after_final(events));
                    return Ok(Some(reply));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream failed; falling back");
                    return Ok(None);
                }
            }
        }

        tracing::warn!("stream ended without a final response; falling back");
        Ok(None)
    }

    /// Apply one transition and tell the observer what visibly changed.
    pub(crate) fn apply(&mut self, input: TurnInput) -> Result<(), TransitionError> {
        let next = self.state.transition(input)?;
        let flags_changed = next.is_loading() != self.state.is_loading()
            || next.show_steps() != self.state.show_steps();
        let steps_changed = next.current_steps() != self.state.current_steps();

        self.state = next;
        if flags_changed {
            self.notify_flags();
        }
        if steps_changed {
            self.notify(SessionUpdate::StepsChanged(self.state.current_steps().to_vec()));
        }
        Ok(())
    }

    /// Move the completed reply into the log and return to `Idle`.
    pub(crate) fn commit(&mut self) -> Result<Message, SubmitError> {
        let reply = match &self.state {
            TurnState::Completed { reply } => reply.clone(),
            other => {
                return Err(TransitionError::Invalid {
                    state: other.name(),
                    input: "commit",
                }
                .into())
            }
        };
        self.apply(TurnInput::Acknowledge)?;
        tracing::info!(has_steps = reply.has_steps, steps = reply.steps.len(), "turn completed");
        self.append(reply.clone());
        Ok(reply)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), SubmitError> {
        match &self.observer {
            Some(tx) if tx.is_closed() => Err(SubmitError::Detached),
            _ => Ok(()),
        }
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.notify(SessionUpdate::MessageAppended(message));
    }

    fn notify_flags(&self) {
        self.notify(SessionUpdate::StateChanged {
            loading: self.state.is_loading(),
            show_steps: self.state.show_steps(),
        });
    }

    fn notify(&self, update: SessionUpdate) {
        if let Some(tx) = &self.observer {
            if tx.send(update).is_err() {
                tracing::debug!("observer gone; dropping update");
            }
        }
    }
}

/// Consume whatever the transport still sends after the final frame.
async fn drain_after_final(mut events: EventStream) {
    let mut ignored = 0usize;
    while let Some(item) = events.next().await {
        match item {
            Ok(_) => ignored += 1,
            Err(e) => {
                tracing::debug!(error = %e, "stream closed uncleanly after final response");
                break;
            }
        }
    }
    if ignored > 0 {
        tracing::debug!(ignored, "ignored frames after final response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{CONNECTION_APOLOGY, SIMPLE_APOLOGY};
    use async_trait::async_trait;
    use futures::stream;
    use shared::{FallbackReply, Sender, StepStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use transport::{ByteStream, TransportError};

    #[derive(Clone)]
    enum Chunk {
        Bytes(&'static str),
        Fail,
    }

    #[derive(Clone)]
    enum Simple {
        Json(serde_json::Value),
        Fail,
    }

    struct ScriptedBackend {
        streaming: bool,
        open_fails: bool,
        chunks: Vec<Chunk>,
        /// Hold the stream open after the scripted chunks.
        keep_open: bool,
        simple: Simple,
        stream_calls: AtomicUsize,
        simple_calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn streaming(chunks: Vec<Chunk>) -> Self {
            Self {
                streaming: true,
                open_fails: false,
                chunks,
                keep_open: false,
                simple: Simple::Json(serde_json::json!({"response": "from fallback"})),
                stream_calls: AtomicUsize::new(0),
                simple_calls: AtomicUsize::new(0),
            }
        }

        fn blocking(simple: Simple) -> Self {
            Self {
                streaming: false,
                simple,
                ..Self::streaming(Vec::new())
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn open_stream(&self, _message: &str) -> Result<ByteStream, TransportError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            if self.open_fails {
                return Err(TransportError::Status {
                    status: 502,
                    detail: "bad gateway".into(),
                });
            }
            let items: Vec<Result<Vec<u8>, TransportError>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Chunk::Bytes(s) => Ok(s.as_bytes().to_vec()),
                    Chunk::Fail => Err(TransportError::Stream("connection reset".into())),
                })
                .collect();
            let scripted = stream::iter(items);
            if self.keep_open {
                Ok(scripted.chain(stream::pending()).boxed())
            } else {
                Ok(scripted.boxed())
            }
        }

        async fn send_simple(&self, _message: &str) -> Result<FallbackReply, TransportError> {
            self.simple_calls.fetch_add(1, Ordering::SeqCst);
            match &self.simple {
                Simple::Json(v) => Ok(FallbackReply::from_value(v)),
                Simple::Fail => Err(TransportError::Stream("connection refused".into())),
            }
        }
    }

    fn session(backend: ScriptedBackend) -> (ChatSession<Arc<ScriptedBackend>>, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (
            ChatSession::new(backend.clone(), ChatSettings::default()),
            backend,
        )
    }

    fn completed_canned_steps(message: &Message) -> bool {
        let names: Vec<&str> = message.steps.iter().map(|s| s.name.as_str()).collect();
        names == ["analysis", "data_collection", "ai_analysis"]
            && message.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_when_streaming_unsupported() {
        let (mut session, backend) = session(ScriptedBackend::blocking(Simple::Json(
            serde_json::json!({"response": "hi there"}),
        )));

        let started = tokio::time::Instant::now();
        let reply = session.submit("hello").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(2400));
        assert_eq!(reply.text, "hi there");
        let log = session.messages();
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].text.as_str(), log[0].sender), ("hello", Sender::User));
        assert_eq!(log[1].sender, Sender::Bot);
        assert!(log[1].has_steps);
        assert!(completed_canned_steps(&log[1]));
        assert!(!session.is_loading());
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_reveals_canned_steps_on_cadence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = ScriptedBackend::blocking(Simple::Json(serde_json::json!({"response": "hi there"})));
        let mut session = ChatSession::new(backend, ChatSettings::default()).with_observer(tx);
        let started = tokio::time::Instant::now();

        let watch = async {
            let mut snapshots = Vec::new();
            while let Some(update) = rx.recv().await {
                match update {
                    SessionUpdate::StepsChanged(steps) if !steps.is_empty() => {
                        snapshots.push((started.elapsed(), steps))
                    }
                    SessionUpdate::MessageAppended(m) if m.is_bot() => break,
                    _ => {}
                }
            }
            snapshots
        };
        let (reply, snapshots) = tokio::join!(session.submit("hello"), watch);
        assert_eq!(reply.unwrap().text, "hi there");

        let seen: Vec<(u64, usize, bool)> = snapshots
            .iter()
            .map(|(at, steps)| {
                let all_processing = steps.iter().all(|s| s.status == StepStatus::Processing);
                (at.as_millis() as u64, steps.len(), all_processing)
            })
            .collect();
        assert_eq!(
            seen,
            vec![(0, 1, true), (800, 2, true), (1600, 3, true), (2400, 3, false)]
        );
        let (_, last) = &snapshots[3];
        assert!(last.iter().all(|s| s.status == StepStatus::Completed));
        let names: Vec<&str> = snapshots[2].1.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["analysis", "data_collection", "ai_analysis"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_ends_while_server_keeps_stream_open() {
        let mut backend = ScriptedBackend::streaming(vec![Chunk::Bytes(
            "data: {\"is_final\":true,\"message\":\"Done\"}\n",
        )]);
        backend.keep_open = true;
        let (mut session, backend) = session(backend);

        let reply = tokio::time::timeout(Duration::from_secs(3600), session.submit("hello"))
            .await
            .expect("submit returns once the final frame is committed")
            .unwrap();

        assert_eq!(reply.text, "Done");
        assert!(session.state().is_idle());
        assert_eq!(session.messages().len(), 2);
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 0);

        let next = tokio::time::timeout(Duration::from_secs(3600), session.submit("again"))
            .await
            .expect("a second turn is accepted")
            .unwrap();
        assert_eq!(next.text, "Done");
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_streamed_steps_merge_by_name() {
        let (mut session, backend) = session(ScriptedBackend::streaming(vec![
            Chunk::Bytes("data: {\"step\":\"analysis\",\"status\":\"processing\",\"message\":\"Analyzing...\"}\n\n"),
            Chunk::Bytes("data: {\"step\":\"analysis\",\"status\":\"comp"),
            Chunk::Bytes("leted\",\"message\":\"Query analyzed\"}\n\ndata: {\"is_final\":true,\"message\":\"Done\"}\n\n"),
        ]));

        let reply = session.submit("hello").await.unwrap();

        assert_eq!(reply.text, "Done");
        assert!(reply.has_steps);
        assert_eq!(reply.steps.len(), 1);
        assert_eq!(reply.steps[0].name, "analysis");
        assert_eq!(reply.steps[0].status, StepStatus::Completed);
        assert_eq!(session.messages().len(), 2);
        assert!(session.state().is_idle());
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_final_without_steps_has_no_steps() {
        let (mut session, _) = session(ScriptedBackend::streaming(vec![Chunk::Bytes(
            "data: {\"is_final\":true,\"message\":\"Quick answer\"}\n",
        )]));

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "Quick answer");
        assert!(!reply.has_steps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_before_any_event_falls_back() {
        let (mut session, backend) = session(ScriptedBackend::streaming(vec![Chunk::Fail]));

        let reply = session.submit("hello").await.unwrap();

        assert_eq!(reply.text, "from fallback");
        assert!(completed_canned_steps(&reply));
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_mid_turn_discards_streamed_steps() {
        let (mut session, _) = session(ScriptedBackend::streaming(vec![
            Chunk::Bytes("data: {\"step\":\"user_extraction\",\"status\":\"processing\"}\n"),
            Chunk::Fail,
        ]));

        let reply = session.submit("hello").await.unwrap();
        assert!(completed_canned_steps(&reply));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_falls_back() {
        let mut backend = ScriptedBackend::streaming(Vec::new());
        backend.open_fails = true;
        let (mut session, backend) = session(backend);

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "from fallback");
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ending_without_final_falls_back() {
        let (mut session, backend) = session(ScriptedBackend::streaming(vec![Chunk::Bytes(
            "data: {\"step\":\"analysis\",\"status\":\"processing\"}\n",
        )]));

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "from fallback");
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_apologises() {
        let (mut session, _) = session(ScriptedBackend::blocking(Simple::Fail));

        let reply = session.submit("hello").await.unwrap();

        assert_eq!(reply.text, CONNECTION_APOLOGY);
        assert!(!reply.has_steps);
        assert!(reply.steps.is_empty());
        assert_eq!(session.messages().len(), 2);
        assert!(!session.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_payload_is_shown_with_steps() {
        let (mut session, _) = session(ScriptedBackend::blocking(Simple::Json(
            serde_json::json!({"error": "graph database unavailable"}),
        )));

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "Error: graph database unavailable");
        assert!(reply.has_steps);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (mut session, _) = session(ScriptedBackend::streaming(vec![Chunk::Bytes(concat!(
            "data: {\"step\":\"analysis\",\"status\":\"completed\"}\n",
            "data: {not valid json\n",
            "data: {\"step\":\"data_collection\",\"status\":\"completed\"}\n",
            "data: {\"is_final\":true,\"message\":\"ok\"}\n",
        ))]));

        let reply = session.submit("hello").await.unwrap();
        let names: Vec<&str> = reply.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["analysis", "data_collection"]);
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_frames_after_final_are_drained_and_ignored() {
        let (mut session, backend) = session(ScriptedBackend::streaming(vec![
            Chunk::Bytes("data: {\"is_final\":true,\"message\":\"first\"}\n"),
            Chunk::Bytes("data: {\"step\":\"late\",\"status\":\"processing\"}\n"),
            Chunk::Bytes("data: {\"is_final\":true,\"message\":\"second\"}\n"),
            Chunk::Fail,
        ]));

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "first");
        assert_eq!(session.messages().len(), 2);
        assert_eq!(backend.simple_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let (mut session, _) = session(ScriptedBackend::streaming(Vec::new()));
        assert!(matches!(session.submit("   \n").await, Err(SubmitError::Empty)));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_simple_mode() {
        let backend = Arc::new(ScriptedBackend::streaming(Vec::new()));
        let settings = ChatSettings {
            mode: ChatMode::Simple,
            greeting: Some("Hello, **How are you?**".into()),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend.clone(), settings);
        assert_eq!(session.messages().len(), 1);

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, "from fallback");
        assert!(!reply.has_steps);
        assert_eq!(backend.stream_calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_simple_mode_failure() {
        let backend = ScriptedBackend::blocking(Simple::Fail);
        let settings = ChatSettings {
            mode: ChatMode::Simple,
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, settings);

        let reply = session.submit("hello").await.unwrap();
        assert_eq!(reply.text, SIMPLE_APOLOGY);
    }

    #[tokio::test]
    async fn test_observer_sees_turn_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = ScriptedBackend::streaming(vec![Chunk::Bytes(concat!(
            "data: {\"step\":\"analysis\",\"status\":\"processing\"}\n",
            "data: {\"step\":\"analysis\",\"status\":\"completed\"}\n",
            "data: {\"is_final\":true,\"message\":\"Done\"}\n",
        ))]);
        let mut session = ChatSession::new(backend, ChatSettings::default()).with_observer(tx);

        session.submit("hello").await.unwrap();
        drop(session);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }

        assert_eq!(
            updates.first(),
            Some(&SessionUpdate::StateChanged {
                loading: true,
                show_steps: true
            })
        );
        let snapshots: Vec<StepStatus> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::StepsChanged(steps) if !steps.is_empty() => Some(steps[0].status),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots, vec![StepStatus::Processing, StepStatus::Completed]);
        assert!(updates.contains(&SessionUpdate::StateChanged {
            loading: false,
            show_steps: false
        }));
        match updates.last() {
            Some(SessionUpdate::MessageAppended(m)) => assert_eq!(m.text, "Done"),
            other => panic!("unexpected last update {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_observer_abandons_turn() {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = ScriptedBackend::blocking(Simple::Json(serde_json::json!({"response": "x"})));
        let mut session = ChatSession::new(backend, ChatSettings::default()).with_observer(tx);
        drop(rx);

        assert!(matches!(
            session.submit("hello").await,
            Err(SubmitError::Detached)
        ));
        assert!(session.state().is_idle());
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_turn_can_be_abandoned() {
        use futures::future::{AbortHandle, Abortable};

        let (mut session, _) = session(ScriptedBackend::blocking(Simple::Json(
            serde_json::json!({"response": "late"}),
        )));
        let (handle, registration) = AbortHandle::new_pair();

        let turn = Abortable::new(session.submit("hello"), registration);
        let aborter = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.abort();
        };
        let (result, _) = tokio::join!(turn, aborter);
        assert!(result.is_err());

        assert!(session.is_loading());
        assert!(matches!(session.submit("again").await, Err(SubmitError::Busy)));

        session.abandon_turn();
        assert!(!session.is_loading());
        let reply = session.submit("again").await.unwrap();
        assert_eq!(reply.text, "late");
    }
}
