use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::core::conversation::Conversation;
use crate::core::generation::{GenerationHandler, StreamEvent, StreamRequest};
use crate::core::message::{is_empty_message, ChunkError, Message, Part, Role};
use crate::core::settings::Settings;
use crate::files::FileManager;
use crate::provider::registry::ProviderRegistry;
use crate::provider::{ProviderError, TextGenerationParams};
use crate::storage::ConversationRepository;
use uuid::Uuid;

/// Errors surfaced to the presentation layer through the error channel.
#[derive(Debug)]
pub enum ChatError {
    /// Programmer/configuration error (for example a selected model whose
    /// provider is missing from settings).
    Configuration(String),
    /// No model selected; the user must pick one before generating.
    ModelNotSelected,
    /// The provider call failed (transport, non-2xx, or unparsable body).
    Provider(ProviderError),
    /// The provider responded but produced no usable content.
    EmptyResult,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Configuration(message) => write!(f, "configuration error: {message}"),
            ChatError::ModelNotSelected => write!(f, "no chat model selected"),
            ChatError::Provider(err) => write!(f, "generation failed: {err}"),
            ChatError::EmptyResult => write!(f, "the model returned no usable content"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        ChatError::Provider(err)
    }
}

impl From<ChunkError> for ChatError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::EmptyTranscript => ChatError::Configuration(err.to_string()),
            ChunkError::NoChoices | ChunkError::MissingMessage => ChatError::EmptyResult,
        }
    }
}

/// Subscription handles returned alongside a controller.
pub struct ChatEvents {
    /// Latest transcript snapshot; updated on every mutation.
    pub transcript: watch::Receiver<Conversation>,
    /// User-visible errors, in order of occurrence.
    pub errors: mpsc::UnboundedReceiver<ChatError>,
}

struct ActiveJob {
    cancel: CancellationToken,
    generation_id: u64,
}

struct ChatState {
    conversation: Conversation,
    settings: Settings,
    job: Option<ActiveJob>,
    generation_seq: u64,
    title_delay: Duration,
}

struct Inner {
    state: Mutex<ChatState>,
    repository: Arc<dyn ConversationRepository>,
    registry: Arc<ProviderRegistry>,
    files: Arc<dyn FileManager>,
    handler: GenerationHandler,
    transcript_tx: watch::Sender<Conversation>,
    error_tx: mpsc::UnboundedSender<ChatError>,
}

/// The per-conversation state machine.
///
/// Owns the open conversation's transcript and the single in-flight
/// generation job. All mutation is linearized through the internal lock; the
/// repository is only ever written from here.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        registry: Arc<ProviderRegistry>,
        files: Arc<dyn FileManager>,
        settings: Settings,
    ) -> (Self, ChatEvents) {
        let conversation = Conversation::of_id(Uuid::new_v4().to_string());
        let (transcript_tx, transcript_rx) = watch::channel(conversation.clone());
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let handler = GenerationHandler::new(registry.clone());

        let controller = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChatState {
                    conversation,
                    settings,
                    job: None,
                    generation_seq: 0,
                    title_delay: Duration::from_secs(1),
                }),
                repository,
                registry,
                files,
                handler,
                transcript_tx,
                error_tx,
            }),
        };
        let events = ChatEvents {
            transcript: transcript_rx,
            errors: error_rx,
        };
        (controller, events)
    }

    /// Delay between a successful generation and the automatic title
    /// attempt. Hosts and tests may shorten it.
    pub fn set_title_delay(&self, delay: Duration) {
        self.lock_state().title_delay = delay;
    }

    pub fn conversation(&self) -> Conversation {
        self.lock_state().conversation.clone()
    }

    pub fn settings(&self) -> Settings {
        self.lock_state().settings.clone()
    }

    pub fn update_settings(&self, settings: Settings) {
        self.lock_state().settings = settings;
    }

    pub fn set_chat_model(&self, model_id: impl Into<String>) {
        self.lock_state().settings.chat_model_id = model_id.into();
    }

    /// Open a conversation by id. Falls back to an empty placeholder when
    /// the id is unknown; "new chat" is simply "not yet persisted".
    pub async fn load(&self, id: &str) {
        let loaded = match self.inner.repository.get_by_id(id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => Conversation::of_id(id),
            Err(err) => {
                tracing::warn!(error = %err, id, "failed to load conversation");
                Conversation::of_id(id)
            }
        };

        let snapshot = {
            let mut state = self.lock_state();
            Self::cancel_job(&mut state);
            state.conversation = loaded;
            state.conversation.clone()
        };
        self.broadcast(snapshot);
    }

    /// Append a user message and start generating a reply. Cancels any
    /// previous job first; the append happens before the job starts, so a
    /// cancelled job never loses the user's own message.
    pub fn send(&self, parts: Vec<Part>) {
        if is_empty_message(&parts) {
            return;
        }
        let snapshot = {
            let mut state = self.lock_state();
            Self::cancel_job(&mut state);
            state.conversation.messages.push(Message::new(Role::User, parts));
            state.conversation.touch();
            state.conversation.clone()
        };
        self.broadcast(snapshot);
        self.start_generation();
    }

    /// Replace a message's parts by identity, then redo the exchange from
    /// the edited message.
    pub async fn edit(&self, message_id: &str, parts: Vec<Part>) {
        if is_empty_message(&parts) {
            return;
        }
        let (old, snapshot) = {
            let mut state = self.lock_state();
            let old = state.conversation.clone();
            let Some(slot) = state
                .conversation
                .messages
                .iter_mut()
                .find(|message| message.id == message_id)
            else {
                return;
            };
            *slot = slot.with_parts(parts);
            state.conversation.touch();
            (old, state.conversation.clone())
        };
        self.cleanup_removed_files(&old, &snapshot);
        self.broadcast(snapshot);
        self.regenerate_at_message(message_id).await;
    }

    /// Truncate the transcript at the given message and regenerate.
    ///
    /// A user-role anchor keeps the anchor and everything before it. Any
    /// other role walks back to the nearest preceding user message, so that
    /// regenerating "from" an assistant reply redoes the exchange that
    /// produced it.
    pub async fn regenerate_at_message(&self, message_id: &str) {
        let snapshot = {
            let mut state = self.lock_state();
            let messages = &state.conversation.messages;
            let Some(index) = messages.iter().position(|m| m.id == message_id) else {
                return;
            };
            let keep = if messages[index].role.is_user() {
                index
            } else {
                match messages[..index].iter().rposition(|m| m.role.is_user()) {
                    Some(user_index) => user_index,
                    None => return,
                }
            };
            Self::cancel_job(&mut state);
            let old = state.conversation.clone();
            state.conversation.messages.truncate(keep + 1);
            state.conversation.touch();
            let snapshot = state.conversation.clone();
            drop(state);
            self.cleanup_removed_files(&old, &snapshot);
            snapshot
        };
        self.broadcast(snapshot.clone());
        self.persist(&snapshot).await;
        self.start_generation();
    }

    /// Cancel the in-flight job, if any. Idempotent; already-appended user
    /// messages and folded output stay as they are.
    pub fn cancel(&self) {
        let mut state = self.lock_state();
        Self::cancel_job(&mut state);
    }

    /// Fire-and-forget title generation; also scheduled automatically after
    /// the first successful exchange.
    pub fn generate_title(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.generate_title_inner().await;
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_job(state: &mut ChatState) {
        if let Some(job) = state.job.take() {
            job.cancel.cancel();
        }
    }

    fn broadcast(&self, conversation: Conversation) {
        self.inner.transcript_tx.send_replace(conversation);
    }

    fn emit_error(&self, err: ChatError) {
        let _ = self.inner.error_tx.send(err);
    }

    /// Delete local image files the new transcript no longer references.
    fn cleanup_removed_files(&self, old: &Conversation, new: &Conversation) {
        let kept = new.local_image_urls();
        let removed: Vec<String> = old
            .local_image_urls()
            .into_iter()
            .filter(|url| !kept.contains(url))
            .collect();
        if !removed.is_empty() {
            self.inner.files.delete_files(&removed);
        }
    }

    async fn persist(&self, conversation: &Conversation) {
        let result = match self.inner.repository.get_by_id(&conversation.id).await {
            Ok(Some(_)) => self.inner.repository.update(conversation).await,
            Ok(None) => self.inner.repository.insert(conversation).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, id = %conversation.id, "failed to persist conversation");
        }
    }

    /// Start one generation attempt against the current transcript.
    fn start_generation(&self) {
        let (request, token, generation_id) = {
            let mut state = self.lock_state();
            Self::cancel_job(&mut state);

            let model = match state
                .settings
                .find_model_by_id(&state.settings.chat_model_id)
                .cloned()
            {
                Some(model) => model,
                None => {
                    drop(state);
                    self.emit_error(ChatError::ModelNotSelected);
                    return;
                }
            };

            state.generation_seq += 1;
            let generation_id = state.generation_seq;
            let token = CancellationToken::new();
            state.job = Some(ActiveJob {
                cancel: token.clone(),
                generation_id,
            });

            (
                StreamRequest {
                    settings: state.settings.clone(),
                    model,
                    messages: state.conversation.messages.clone(),
                    transformers: Vec::new(),
                    assistant: None,
                    params: None,
                    cancel_token: token.clone(),
                    generation_id,
                },
                token,
                generation_id,
            )
        };

        let controller = self.clone();
        tokio::spawn(async move {
            let mut rx = controller.inner.handler.stream_text(request);
            let mut failed = false;
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                match event {
                    (StreamEvent::Snapshot(messages), id) => {
                        let snapshot = {
                            let mut state = controller.lock_state();
                            // Stale attempts must not clobber newer state;
                            // checked here, at the fold/persist boundary.
                            if id != state.generation_seq || token.is_cancelled() {
                                return;
                            }
                            state.conversation.messages = messages;
                            state.conversation.touch();
                            state.conversation.clone()
                        };
                        controller.broadcast(snapshot.clone());
                        if !token.is_cancelled() {
                            controller.persist(&snapshot).await;
                        }
                    }
                    (StreamEvent::Error(err), id) => {
                        failed = true;
                        let current = controller.lock_state().generation_seq;
                        if id == current {
                            controller.emit_error(err);
                        }
                    }
                    (StreamEvent::End, _) => break,
                }
            }

            if !failed && !token.is_cancelled() {
                let delay = controller.lock_state().title_delay;
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = async {
                        tokio::time::sleep(delay).await;
                        controller.generate_title_inner().await;
                    } => {}
                }
            }
            controller.finish_job(generation_id);
        });
    }

    fn finish_job(&self, generation_id: u64) {
        let mut state = self.lock_state();
        if state
            .job
            .as_ref()
            .is_some_and(|job| job.generation_id == generation_id)
        {
            state.job = None;
        }
    }

    /// One-shot title generation: direct provider call, bypassing the
    /// transformer/snapshot path. Failures are logged, not surfaced, except
    /// for an empty result.
    async fn generate_title_inner(&self) {
        let (conversation_id, prompt, setting, model) = {
            let state = self.lock_state();
            if !state.conversation.title.trim().is_empty() {
                return;
            }
            let Some(model) = state
                .settings
                .find_model_by_id(&state.settings.chat_model_id)
                .cloned()
            else {
                return;
            };
            let Some(setting) = state.settings.find_provider_for_model(&model.id).cloned() else {
                return;
            };
            let content = state
                .conversation
                .messages
                .iter()
                .map(Message::summary_text)
                .collect::<Vec<_>>()
                .join("\n\n");
            (
                state.conversation.id.clone(),
                title_prompt(&content),
                setting,
                model,
            )
        };

        let params = TextGenerationParams {
            model: model.clone(),
            temperature: Some(0.3),
            top_p: 1.0,
        };
        let provider = self.inner.registry.provider_for(&setting);
        let messages = [Message::user(prompt)];

        let chunk = match provider.generate_text(&setting, &messages, &params).await {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(error = %err, "title generation failed");
                return;
            }
        };

        let title = chunk
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref().or(choice.delta.as_ref()))
            .map(|message| message.to_text().trim().to_string())
            .unwrap_or_default();
        if title.is_empty() {
            self.emit_error(ChatError::EmptyResult);
            return;
        }

        let snapshot = {
            let mut state = self.lock_state();
            if state.conversation.id != conversation_id
                || !state.conversation.title.trim().is_empty()
            {
                return;
            }
            state.conversation.title = title;
            state.conversation.clone()
        };
        self.broadcast(snapshot.clone());
        self.persist(&snapshot).await;
    }
}

fn title_prompt(content: &str) -> String {
    format!(
        "Summarize the conversation below into a title of at most 15 words.\n\
         1. Write the title in the user's primary language\n\
         2. Do not use punctuation marks or other special symbols\n\
         3. Reply with the title only\n\
         <content>\n{content}\n</content>"
    )
}
