//! Query intent classification.
//!
//! Classification is deliberately behind a trait: today's implementation is
//! a keyword-bag heuristic, and a learned classifier can replace it without
//! touching the retriever or the orchestrator.

/// Weight-profile selector derived from the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryProfile {
    /// Schedule, meetings, reminders.
    Schedule,
    /// Questions about the user themselves.
    Personal,
    /// Everything else.
    General,
}

impl QueryProfile {
    /// Stable label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Personal => "personal",
            Self::General => "general",
        }
    }
}

/// Full classification of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryIntent {
    /// Which scoring weight profile applies.
    pub profile: QueryProfile,
    /// The user asked for everything that is known about them.
    pub comprehensive: bool,
    /// The user wants general knowledge (summaries, explanations).
    pub knowledge_seeking: bool,
    /// The message is a short greeting.
    pub greeting: bool,
}

/// Pluggable text-to-intent classifier.
pub trait IntentClassifier: Send + Sync {
    /// Classify a query.
    fn classify(&self, query: &str) -> QueryIntent;
}

const SCHEDULE_KEYWORDS: &[&str] = &[
    "schedule",
    "meeting",
    "appointment",
    "calendar",
    "call",
    "tomorrow",
    "today",
    "next week",
    "remind",
];

const PERSONAL_KEYWORDS: &[&str] = &[
    "my name",
    "who am i",
    "about me",
    "my job",
    "my location",
    "my preference",
    "what do you know",
];

const COMPREHENSIVE_KEYWORDS: &[&str] = &[
    "everything",
    "all details",
    "each and every",
    "all you know",
];

const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "summarize",
    "summarise",
    "tell me about",
    "explain",
    "what is",
    "what are",
    "how does",
];

const GREETING_WORDS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Longest message (in words) still treated as a possible greeting.
const GREETING_MAX_WORDS: usize = 4;

/// Keyword-bag classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Create the default classifier.
    pub fn new() -> Self {
        Self
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, query: &str) -> QueryIntent {
        let lower = query.to_lowercase();

        let profile = if SCHEDULE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            QueryProfile::Schedule
        } else if PERSONAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            QueryProfile::Personal
        } else {
            QueryProfile::General
        };

        let word_count = lower.split_whitespace().count();
        let greeting = word_count <= GREETING_MAX_WORDS
            && GREETING_WORDS
                .iter()
                .any(|word| lower.trim_end_matches(['!', '.', '?']).starts_with(word));

        QueryIntent {
            profile,
            comprehensive: COMPREHENSIVE_KEYWORDS.iter().any(|kw| lower.contains(kw)),
            knowledge_seeking: KNOWLEDGE_KEYWORDS.iter().any(|kw| lower.contains(kw)),
            greeting,
        }
    }
}
