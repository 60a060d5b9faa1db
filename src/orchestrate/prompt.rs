//! System prompt assembly.
//!
//! The prompt is a fixed multi-section template kept as data: a
//! [`PromptContext`] carries the five insertion points (turn, user, memory
//! count, silence flag, memory list) plus one additive directive slot, and
//! [`render`] produces the final string. No prompt text is assembled
//! anywhere else.

use crate::retrieve::ScoredMemory;

/// Additive directive selected by query intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// No specialized handling.
    None,
    /// The user asked about their schedule.
    Schedule,
    /// The user asked for everything that is known about them.
    Comprehensive,
    /// The user wants general knowledge rather than recall.
    Knowledge,
    /// A returning user opened a new conversation.
    ReturningUser {
        /// Count of memories known about the user.
        memory_count: usize,
    },
}

/// Insertion points for one rendered prompt.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    /// Current turn number.
    pub turn_number: i64,
    /// Opaque user id.
    pub user_id: &'a str,
    /// Injected long-term memories (empty under silence).
    pub memories: &'a [ScoredMemory],
    /// Whether silence mode suppressed injection.
    pub silence: bool,
    /// Additive directive slot.
    pub directive: Directive,
}

const CORE_RULES: &str = "\
You are a persistent conversational AI assistant.

## CORE RULES
1. Follow-up context: if the user says \"summarize it\", \"continue\", \"that one\", \
\"why?\", apply it to the most recent topic from the conversation history.
2. Short-term context from this thread takes priority over long-term memories.
3. Respond naturally; never explain your memory system or architecture.
4. Answer general-knowledge questions directly from your training data.
5. Use long-term memories only when clearly relevant to the current topic.";

const SCHEDULE_DIRECTIVE: &str = "\
## ADDITIONAL DIRECTIVE: SCHEDULE QUERY
The user is asking about their schedule, meetings, or appointments.
- Report scheduled items with their DATE and TIME (\"You have [event] on [date] at [time]\").
- Do not include unrelated personal facts or preferences.
- If no schedule is found, say you have no scheduled meetings or appointments in memory.";

const COMPREHENSIVE_DIRECTIVE: &str = "\
## ADDITIONAL DIRECTIVE: COMPREHENSIVE INFORMATION REQUEST
The user asked for everything you know about them.
- List every memory from the context below; do not summarize details away.
- Organize by category: personal information, professional details, relationships, \
preferences, commitments, instructions, other facts.";

const KNOWLEDGE_DIRECTIVE: &str = "\
## ADDITIONAL DIRECTIVE: KNOWLEDGE REQUEST
The user is asking for information, explanations, or summaries.
- Answer from your general knowledge; do not wait for memory context.
- Be thorough and educational. Provide value even if no relevant memories exist.";

const SILENCE_BEHAVIOR: &str = "\
SILENCE MODE IS ACTIVE: no long-term memory is relevant to this query.
- Respond using general knowledge and the short-term conversation context only.
- Do not mention stored memories and do not fabricate memory recall.
The best memory systems are silent most of the time. This is that time.";

const MEMORY_BEHAVIOR: &str = "\
Silence mode: disabled. The long-term memories above are relevant; use them wisely.";

/// Render the system prompt for one turn.
pub fn render(ctx: &PromptContext<'_>) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(5);
    sections.push(CORE_RULES.to_owned());

    sections.push(format!(
        "## CONTEXT\nSession: turn {} | user: {} | long-term memories: {}",
        ctx.turn_number,
        ctx.user_id,
        ctx.memories.len()
    ));

    if !ctx.memories.is_empty() {
        let mut listing = String::from("## RELEVANT MEMORIES\n");
        for scored in ctx.memories {
            listing.push_str(&format!(
                "- [{}] {} (from turn {})\n",
                scored.memory.kind.as_str(),
                scored.memory.content,
                scored.memory.source_turn
            ));
        }
        sections.push(listing.trim_end().to_owned());
    }

    match &ctx.directive {
        Directive::None => {}
        Directive::Schedule => sections.push(SCHEDULE_DIRECTIVE.to_owned()),
        Directive::Comprehensive => sections.push(COMPREHENSIVE_DIRECTIVE.to_owned()),
        Directive::Knowledge => sections.push(KNOWLEDGE_DIRECTIVE.to_owned()),
        Directive::ReturningUser { memory_count } => sections.push(format!(
            "## ADDITIONAL DIRECTIVE: RETURNING USER\n\
             This user has returned; you hold {memory_count} memories from previous \
             conversations. Greet them warmly and briefly, mention at most one \
             remembered fact, and ask how you can help. Never mention user ids or \
             technical details."
        )),
    }

    sections.push(
        if ctx.silence {
            SILENCE_BEHAVIOR
        } else {
            MEMORY_BEHAVIOR
        }
        .to_owned(),
    );

    sections.join("\n\n")
}

/// Choose the additive directive from the query intent and user state.
pub fn directive_for(
    intent: &crate::retrieve::intent::QueryIntent,
    is_new_conversation: bool,
    known_memories: usize,
) -> Directive {
    if intent.comprehensive {
        Directive::Comprehensive
    } else if intent.knowledge_seeking {
        Directive::Knowledge
    } else if intent.profile == crate::retrieve::intent::QueryProfile::Schedule {
        Directive::Schedule
    } else if intent.greeting && is_new_conversation && known_memories > 0 {
        Directive::ReturningUser {
            memory_count: known_memories,
        }
    } else {
        Directive::None
    }
}
