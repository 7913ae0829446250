use std::sync::Arc;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{
        ChatTurnResponse, ConversationDetail, ConversationResponse, CreateConversationRequest,
        SendMessageRequest,
    },
    llm::{ChatModel, PromptMessage, Role},
    parse::{parse_assistant_output, ExtractedSymptom},
    prompts::{build_prompt, HISTORY_LIMIT},
    repo,
    repo_types::MessageRow,
};
use crate::{
    common::{optional_text, required_text},
    error::{ApiError, ApiResult},
    health::{
        self,
        dto::SymptomResponse,
        repo_types::NewSymptom,
        services::{MAX_NOTES_LEN, MAX_SEVERITY, MAX_SYMPTOM_NAME_LEN, MIN_SEVERITY},
    },
    state::AppState,
};

pub const MAX_MESSAGE_LEN: usize = 4000;
pub const MAX_CONVERSATION_TITLE_LEN: usize = 200;
/// Characters of the first user message used as a conversation title.
pub const AUTO_TITLE_LEN: usize = 60;

const UNAVAILABLE: &str = "The health assistant is unavailable right now";

fn conversation_not_found() -> ApiError {
    ApiError::not_found("Conversation not found")
}

fn chat_model(state: &AppState) -> ApiResult<Arc<dyn ChatModel>> {
    state
        .chat
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("Health chat is not configured".into()))
}

pub(crate) fn auto_title(content: &str) -> String {
    let flat: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    flat.chars().take(AUTO_TITLE_LEN).collect::<String>().trim_end().to_string()
}

fn truncate(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect::<String>().trim_end().to_string()
}

/// Model output is untrusted: names are cut to size and severity clamped.
pub(crate) fn to_new_symptom(s: &ExtractedSymptom) -> Option<NewSymptom> {
    let name = truncate(&s.name, MAX_SYMPTOM_NAME_LEN);
    if name.is_empty() {
        return None;
    }
    let severity = s.severity.clamp(MIN_SEVERITY as i64, MAX_SEVERITY as i64) as i16;
    let notes = s
        .notes
        .as_deref()
        .map(|n| truncate(n, MAX_NOTES_LEN))
        .filter(|n| !n.is_empty());
    Some(NewSymptom {
        name,
        severity,
        notes,
        recorded_at: None,
    })
}

pub async fn list_conversations(state: &AppState, user_id: Uuid) -> ApiResult<Vec<ConversationResponse>> {
    let rows = repo::list_conversations(&state.db, user_id).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn create_conversation(
    state: &AppState,
    user_id: Uuid,
    req: CreateConversationRequest,
) -> ApiResult<ConversationResponse> {
    let title = optional_text("title", req.title.as_deref(), MAX_CONVERSATION_TITLE_LEN)?;
    let row = repo::insert_conversation(&state.db, user_id, title.as_deref()).await?;
    info!(%user_id, conversation_id = %row.id, "conversation created");
    Ok(row.into())
}

pub async fn get_conversation(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<ConversationDetail> {
    let conversation = repo::get_conversation(&state.db, user_id, id)
        .await?
        .ok_or_else(conversation_not_found)?;
    let messages = repo::list_messages(&state.db, id).await?;
    Ok(ConversationDetail {
        conversation: conversation.into(),
        messages: messages.into_iter().map(Into::into).collect(),
    })
}

pub async fn delete_conversation(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    if !repo::delete_conversation(&state.db, user_id, id).await? {
        return Err(conversation_not_found());
    }
    info!(%user_id, conversation_id = %id, "conversation deleted");
    Ok(())
}

/// Stores the user turn and returns it with the prompt for the model.
async fn begin_turn(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    content: &str,
) -> ApiResult<(MessageRow, Vec<PromptMessage>)> {
    let mut tx = state.db.begin().await?;
    let conversation = repo::get_conversation(&mut *tx, user_id, conversation_id)
        .await?
        .ok_or_else(conversation_not_found)?;
    let message = repo::insert_message(&mut *tx, conversation.id, Role::User, content).await?;
    let title = conversation.title.is_none().then(|| auto_title(content));
    repo::touch_conversation(&mut *tx, conversation.id, title.as_deref()).await?;
    tx.commit().await?;

    let history = repo::recent_messages(&state.db, conversation_id, HISTORY_LIMIT as i64).await?;
    Ok((message, build_prompt(&history)))
}

/// Persists the assistant turn and every symptom it extracted.
async fn finish_turn(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    user_message: MessageRow,
    raw: &str,
) -> ApiResult<ChatTurnResponse> {
    let output = parse_assistant_output(raw);

    let mut tx = state.db.begin().await?;
    let assistant = repo::insert_message(&mut *tx, conversation_id, Role::Assistant, &output.reply).await?;
    let mut symptoms: Vec<SymptomResponse> = Vec::with_capacity(output.symptoms.len());
    for new in output.symptoms.iter().filter_map(to_new_symptom) {
        let row = health::repo::insert_symptom(&mut *tx, user_id, Some(conversation_id), &new).await?;
        symptoms.push(row.into());
    }
    repo::touch_conversation(&mut *tx, conversation_id, None).await?;
    tx.commit().await?;

    info!(
        %user_id,
        %conversation_id,
        symptoms = symptoms.len(),
        suggested_appointment = output.appointment.is_some(),
        "chat turn stored"
    );
    Ok(ChatTurnResponse {
        user_message: user_message.into(),
        assistant_message: assistant.into(),
        symptoms,
        suggested_appointment: output.appointment,
    })
}

pub async fn send_message(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    req: SendMessageRequest,
) -> ApiResult<ChatTurnResponse> {
    let model = chat_model(state)?;
    let content = required_text("content", &req.content, MAX_MESSAGE_LEN)?;

    let (user_message, prompt) = begin_turn(state, user_id, conversation_id, &content).await?;
    let raw = model.complete(&prompt).await.map_err(|e| {
        warn!(error = ?e, %conversation_id, "chat completion failed");
        ApiError::ServiceUnavailable(UNAVAILABLE.into())
    })?;
    finish_turn(state, user_id, conversation_id, user_message, &raw).await
}

#[derive(Debug)]
pub enum StreamEvent {
    Token(String),
    Done(Box<ChatTurnResponse>),
    Error(String),
}

/// Validation and the user turn happen before the stream starts so failures
/// there are plain HTTP errors; afterwards problems arrive as [`StreamEvent::Error`].
///
/// The model is driven by a spawned task, so a client that disconnects early
/// still ends up with the assistant turn stored.
pub async fn stream_message(
    state: AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    req: SendMessageRequest,
) -> ApiResult<impl Stream<Item = StreamEvent> + Send + 'static> {
    let model = chat_model(&state)?;
    let content = required_text("content", &req.content, MAX_MESSAGE_LEN)?;
    let (user_message, prompt) = begin_turn(&state, user_id, conversation_id, &content).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        run_streamed_turn(&state, model, user_id, conversation_id, user_message, prompt, &tx).await;
        if tx.is_closed() {
            info!(%conversation_id, "client left before the streamed turn finished");
        }
    });

    Ok(stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    })
}

// Send failures only mean the client is gone; the turn is finished regardless.
async fn run_streamed_turn(
    state: &AppState,
    model: Arc<dyn ChatModel>,
    user_id: Uuid,
    conversation_id: Uuid,
    user_message: MessageRow,
    prompt: Vec<PromptMessage>,
    events: &UnboundedSender<StreamEvent>,
) {
    let mut tokens = match model.stream(&prompt).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = ?e, %conversation_id, "chat stream failed to start");
            let _ = events.send(StreamEvent::Error(UNAVAILABLE.into()));
            return;
        }
    };

    let mut raw = String::new();
    while let Some(token) = tokens.next().await {
        match token {
            Ok(t) => {
                raw.push_str(&t);
                let _ = events.send(StreamEvent::Token(t));
            }
            Err(e) => {
                warn!(error = ?e, %conversation_id, "chat stream interrupted");
                let _ = events.send(StreamEvent::Error(UNAVAILABLE.into()));
                return;
            }
        }
    }

    let event = match finish_turn(state, user_id, conversation_id, user_message, &raw).await {
        Ok(turn) => StreamEvent::Done(Box::new(turn)),
        Err(e) => {
            let status = e.status();
            StreamEvent::Error(match e {
                ApiError::Internal(inner) => {
                    warn!(error = ?inner, %status, "storing streamed turn failed");
                    "Internal server error".to_string()
                }
                other => other.to_string(),
            })
        }
    };
    let _ = events.send(event);
}
