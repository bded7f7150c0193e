//! Seed policy applied once when a session is entered.
//!
//! Exactly one branch applies, in priority order: persisted history, a single
//! welcome-back message for a session with a bound dataset, or the two-message
//! onboarding script.

use session_backend::{DatasetSummary, Message, MessageKind, Role};
use time::OffsetDateTime;

pub const GREETING_MESSAGE: &str = "Hello! I am your data analysis assistant. I will help you analyze your data and provide insights.";
pub const UPLOAD_PROMPT_MESSAGE: &str =
    "To get started, please upload a CSV file containing your dataset.";
pub const WELCOME_BACK_MESSAGE: &str = "Welcome back! Your dataset is ready for analysis.";

#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    Persisted(Vec<Message>),
    WelcomeBack(Message),
    Onboarding { greeting: Message, prompt: Message },
}

impl Seed {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Persisted(messages) => messages,
            Self::WelcomeBack(message) => vec![message],
            Self::Onboarding { greeting, prompt } => vec![greeting, prompt],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted(_) => "persisted",
            Self::WelcomeBack(_) => "welcome-back",
            Self::Onboarding { .. } => "onboarding",
        }
    }
}

/// Choose the seed for a resumed session. Synthetic messages are stamped `now`.
pub fn reconcile_history(
    history: Vec<Message>,
    dataset: Option<&DatasetSummary>,
    now: OffsetDateTime,
) -> Seed {
    if !history.is_empty() {
        return Seed::Persisted(history);
    }

    if let Some(dataset) = dataset.filter(|dataset| !dataset.is_placeholder()) {
        return Seed::WelcomeBack(Message::dataset(
            WELCOME_BACK_MESSAGE,
            dataset.clone(),
            now,
        ));
    }

    Seed::Onboarding {
        greeting: Message::assistant_text(GREETING_MESSAGE, now),
        prompt: Message::new(
            Role::Assistant,
            UPLOAD_PROMPT_MESSAGE,
            MessageKind::UploadPrompt,
            now,
        ),
    }
}
