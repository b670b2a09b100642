//! Prompt text sent to the moderation model.

use crate::moderator::{AppReview, AppealReview, PageReview};

pub const PAGE_SYSTEM_PROMPT: &str = "\
You are an expert content analyst evaluating web content for child safety and educational value.
A parent has written guidelines describing what is appropriate for their child. You will receive
a URL, a page title, and an extract of the page text. Decide whether the child may view it.

Do not be overly aggressive. If the parent says no adult content, do not block a search engine
just because it could be used to search for adult content. Stick to the parent's guidelines.

You must provide TWO separate explanations:
1. \"reasoning\": a vague, generic explanation shown to the child. Do NOT reveal the parent's
   guidelines or specific rules. Maximum 30 words.
2. \"parental_reasoning\": a detailed explanation for the parent naming which guideline the
   content meets or violates. Maximum 80 words.

Reply with a single JSON object and nothing else:
{\"action\": \"approve\" | \"block\", \"reasoning\": \"...\", \"parental_reasoning\": \"...\"}";

pub const APPEAL_SYSTEM_PROMPT: &str = "\
You are reviewing a child's appeal against a block placed by a parental-control service.
You will receive the parent's guidelines, the blocked URL or application, the reason it was
blocked, and the child's reason for wanting access. Approve only if access is consistent with
the parent's guidelines given the child's stated purpose.

You must provide TWO separate explanations:
1. \"reasoning\": shown to the child. Do NOT reveal the parent's guidelines. Maximum 30 words.
2. \"parental_reasoning\": a detailed explanation for the parent that considers the child's
   appeal. Maximum 80 words.

Reply with a single JSON object and nothing else:
{\"action\": \"approve\" | \"block\", \"reasoning\": \"...\", \"parental_reasoning\": \"...\"}";

pub const APP_SYSTEM_PROMPT: &str = "\
You are reviewing desktop application usage for a parental-control service. You will receive
the parent's guidelines, the application name, the window title, and possibly a screenshot.

Consider whether the child is using the application to get around browser monitoring (VPNs,
proxies, messaging apps with embedded browsers), whether it is used for purposes that violate
the guidelines, or whether it is a normal activity such as homework or an approved game.

You must provide TWO separate explanations:
1. \"reasoning\": a brief, child-safe explanation. Do NOT reveal the parent's guidelines.
   Maximum 30 words.
2. \"parental_reasoning\": what you observed and why you decided. Maximum 100 words.

Reply with a single JSON object and nothing else:
{\"action\": \"ok\" | \"block\", \"reasoning\": \"...\", \"parental_reasoning\": \"...\"}";

/// Keep at most `limit` characters (not bytes) of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn page_prompt(page: &PageReview, content_char_limit: usize) -> String {
    let content = page
        .content
        .as_deref()
        .map(|c| truncate_chars(c, content_char_limit))
        .unwrap_or("(no content provided)");
    format!(
        "The parent has requested the following standards for content evaluation: {}\n\n\
         URL: {}\nTitle: {}\nContent: {}",
        page.guidelines,
        page.url,
        page.title.as_deref().unwrap_or("(untitled)"),
        content,
    )
}

pub fn appeal_prompt(appeal: &AppealReview) -> String {
    format!(
        "The parent has requested the following standards for content evaluation: {}\n\n\
         URL or application: {}\nTitle: {}\nPast reasoning for blocking: {}\n\n\
         The child appealed the block with this reason:\n{}",
        appeal.guidelines,
        appeal.resource_link,
        appeal.title.as_deref().unwrap_or("(untitled)"),
        appeal.previous_reason,
        appeal.child_reason,
    )
}

pub fn app_prompt(app: &AppReview) -> String {
    format!(
        "The parent has set the following monitoring guidelines: {}\n\n\
         Application name: {}\nWindow title: {}\nScreenshot: {}",
        app.guidelines,
        app.app_name,
        app.window_title.as_deref().unwrap_or("(none)"),
        if app.screenshot.is_some() {
            "provided as image"
        } else {
            "not available"
        },
    )
}
