//! Prompt construction for the coaching engine.
//!
//! A prompt is one string with fixed sections: the coaching instruction,
//! the interview focus, retrieved document context, the recent conversation,
//! the candidate's new message, and the output schema.

use proview_core::types::{ConversationTurn, Role};

use crate::context::PromptContext;

/// Standing instruction for every coaching turn.
pub const COACHING_INSTRUCTION: &str = "\
You are ProView AI Coach, an expert interview preparation assistant. Your role is to:

1. Identify the role and level: work out the job role, seniority and interview type \
(technical, behavioral, case study) from what the candidate says and from their documents.
2. Simulate a realistic interview: ask one relevant question at a time. Personalize questions \
with the retrieved résumé and job description context when it is available.
3. Evaluate answers: when the candidate answers a question, set is_correct, give a score from \
0 to 10, explain in refined_explanation what was strong, what was missing and how to improve.
4. Adapt difficulty: start with easier questions and raise the difficulty as the candidate does well.
5. Use context wisely: with a résumé, tailor questions to their experience; with a job \
description, focus on the required skills; with no context, ask general questions for the \
stated role, and if no role is known yet, ask for it first.

Be professional but encouraging. Give specific, actionable feedback. Do not be harsh with \
beginners; expect detailed, nuanced answers for senior roles.";

/// Output contract appended to every prompt.
pub const OUTPUT_SCHEMA: &str = r#"Reply with exactly one JSON object and nothing else, using these fields:
{
  "interviewer_chat": string, never empty - your conversational reply,
  "is_correct": true | false | null - only when evaluating an answer,
  "score": number from 0 to 10 | null - only when evaluating an answer,
  "refined_explanation": string | null - detailed feedback, only when evaluating an answer,
  "suggested_replies": array of 2 or 3 short strings the candidate could send next
}
When you ask a question instead of evaluating an answer, is_correct, score and refined_explanation must all be null. score and is_correct are either both null or both set. Do not add other fields."#;

/// Optional interview focus supplied by the caller and the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleContext {
    /// Role the candidate says they are preparing for.
    pub target_role: Option<String>,
    /// Names of the documents uploaded to the session.
    pub source_files: Vec<String>,
}

/// Render a full prompt.
///
/// Only the last `max_history` non-blank turns of `history` are included.
pub fn render(
    role: &RoleContext,
    history: &[ConversationTurn],
    context: &PromptContext,
    user_message: &str,
    max_history: usize,
) -> String {
    let mut prompt = String::with_capacity(COACHING_INSTRUCTION.len() + context.text.len() + 1024);
    prompt.push_str(COACHING_INSTRUCTION);

    prompt.push_str("\n\n## Interview focus\n");
    match role.target_role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(target) => {
            prompt.push_str("Target role: ");
            prompt.push_str(target);
            prompt.push('\n');
        }
        None => prompt.push_str("Target role: not stated yet\n"),
    }
    if role.source_files.is_empty() {
        prompt.push_str("Candidate documents: none uploaded\n");
    } else {
        prompt.push_str("Candidate documents: ");
        prompt.push_str(&role.source_files.join(", "));
        prompt.push('\n');
    }

    prompt.push_str("\n## Retrieved context\n");
    if context.is_empty() {
        prompt.push_str("(no document context available)\n");
    } else {
        prompt.push_str(&context.text);
        prompt.push('\n');
    }

    prompt.push_str("\n## Conversation so far\n");
    let turns = recent_turns(history, max_history);
    if turns.is_empty() {
        prompt.push_str("(this is the first message)\n");
    } else {
        for turn in turns {
            prompt.push_str(&format_turn(turn));
            prompt.push('\n');
        }
    }

    prompt.push_str("\n## Candidate's new message\n");
    prompt.push_str(user_message);

    prompt.push_str("\n\n## Output format\n");
    prompt.push_str(OUTPUT_SCHEMA);
    prompt
}

/// Append a correction after a reply failed validation.
pub fn with_schema_correction(prompt: &str, reason: &str) -> String {
    format!(
        "{}\n\n## Correction\nYour previous reply was rejected: {}. \
         Reply again with exactly one JSON object that follows the output format above. \
         No prose, no code fences, no extra fields.",
        prompt, reason
    )
}

/// The last `max` turns with non-blank content, oldest first.
fn recent_turns(history: &[ConversationTurn], max: usize) -> Vec<&ConversationTurn> {
    let mut turns: Vec<&ConversationTurn> = history
        .iter()
        .rev()
        .filter(|t| !t.content.trim().is_empty())
        .take(max)
        .collect();
    turns.reverse();
    turns
}

fn format_turn(turn: &ConversationTurn) -> String {
    let speaker = match turn.role {
        Role::User => "Candidate",
        Role::Assistant => "Coach",
    };
    let mut line = format!("{}: {}", speaker, turn.content.trim());

    if let Some(eval) = &turn.evaluation {
        if let Some(score) = eval.score {
            let verdict = match eval.is_correct {
                Some(true) => "correct",
                Some(false) => "incorrect",
                None => "ungraded",
            };
            line.push_str(&format!(" [evaluation: {}, score {}/10]", verdict, score));
        }
    }
    line
}
