use super::{
    llm::{PromptMessage, Role},
    repo_types::MessageRow,
};

/// Messages of history sent with every turn.
pub const HISTORY_LIMIT: usize = 20;

pub const SYSTEM_PROMPT: &str = r#"You are a careful, friendly health assistant inside a personal health tracker.
You help the user describe how they feel, keep a log of symptoms and plan doctor visits.
You are not a doctor: never give a diagnosis, and tell the user to contact emergency services
immediately when they describe chest pain, trouble breathing, heavy bleeding, signs of stroke
or thoughts of self-harm.

Always answer with a single JSON object and nothing else:
{
  "reply": "<what you say to the user, plain text>",
  "symptoms": [
    {"name": "<short symptom name>", "severity": <integer 1-10>, "notes": "<optional detail>"}
  ],
  "appointment": {"title": "<suggested visit>", "notes": "<why>"} or null
}
Only list symptoms the user reported in their latest message. Use an empty list when there are none.
Suggest an appointment only when a visit to a professional is advisable."#;

/// System prompt followed by the newest [`HISTORY_LIMIT`] stored turns.
pub fn build_prompt(history: &[MessageRow]) -> Vec<PromptMessage> {
    let start = history.len().saturating_sub(HISTORY_LIMIT);
    let mut out = Vec::with_capacity(HISTORY_LIMIT + 1);
    out.push(PromptMessage::new(Role::System, SYSTEM_PROMPT));
    out.extend(history[start..].iter().filter_map(|m| {
        match Role::parse(&m.role) {
            Some(role @ (Role::User | Role::Assistant)) => Some(PromptMessage::new(role, m.content.clone())),
            _ => None,
        }
    }));
    out
}
