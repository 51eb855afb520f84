//! Prompt template for the generative extractor.

use crate::types::Intent;

/// System instruction constraining the model to one JSON object.
fn system_prompt() -> String {
    let labels = Intent::all_names()
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You extract a to-do item from one phone notification.
Reply with exactly one JSON object and nothing else. Its keys are "intent", "summary" and "due_time".

intent: exactly one of [{labels}]. Judge by the body of the notification, not by the app name or bracketed prefix.

summary: a short action phrase of 5 to 15 characters that starts with a verb, in the notification's language.
Never copy the notification text verbatim.
Examples: "Send PRD to boss", "给老板发PRD", "Pick up parcel at locker".

due_time: the time expression from the text, copied as written (for example "today 3pm", "明天上午9点").
If the text mentions several times because plans changed, give the final confirmed one.
If there is no time in the text, use null."#
    )
}

/// ChatML prompt for one notification.
pub fn build_prompt(text: &str) -> String {
    format!(
        "<|im_start|>system\n{}<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
        system_prompt(),
        text.trim()
    )
}
