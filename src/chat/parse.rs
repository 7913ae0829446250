//! Tolerant reading of the model's structured answer.
//!
//! Models wrap JSON in code fences, add prose around it, or ignore the format
//! entirely. Whatever comes back, the user always gets a reply.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantOutput {
    pub reply: String,
    #[serde(default)]
    pub symptoms: Vec<ExtractedSymptom>,
    #[serde(default)]
    pub appointment: Option<SuggestedAppointment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedSymptom {
    pub name: String,
    #[serde(default = "default_severity", deserialize_with = "lenient_severity")]
    pub severity: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAppointment {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_severity() -> i64 {
    5
}

// accepts 7, 7.5 and "7"
fn lenient_severity<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(default_severity))
}

impl AssistantOutput {
    fn plain(text: &str) -> Self {
        Self {
            reply: text.trim().to_string(),
            symptoms: Vec::new(),
            appointment: None,
        }
    }
}

/// Content of the first fenced block, or the input when there is none.
fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw;
    };
    let after = &raw[open + 3..];
    // drop the info string ("json")
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Outermost `{ ... }` span.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_assistant_output(raw: &str) -> AssistantOutput {
    let candidate = json_object(strip_code_fence(raw)).or_else(|| json_object(raw));
    match candidate.and_then(|c| serde_json::from_str::<AssistantOutput>(c).ok()) {
        Some(mut out) if !out.reply.trim().is_empty() => {
            out.reply = out.reply.trim().to_string();
            out.symptoms.retain(|s| !s.name.trim().is_empty());
            out.appointment = out.appointment.filter(|a| !a.title.trim().is_empty());
            out
        }
        _ => AssistantOutput::plain(raw),
    }
}
