use llmhub_protocol::codex::request::CreateResponseRequest;

use crate::official::{default_instructions_for, is_official_codex_client};

/// Scrub a Response-API-bound body from a non-official client so the
/// upstream accepts it: swap in the official instructions for the model,
/// drop the parameters the upstream rejects, and pin the forced fields.
/// Official clients bypass the scrub entirely.
///
/// Returns whether the body was modified.
pub fn sanitize_response_request(
    request: &mut CreateResponseRequest,
    user_agent: Option<&str>,
) -> bool {
    if is_official_codex_client(user_agent) {
        return false;
    }

    request.instructions = Some(default_instructions_for(&request.model).to_string());
    request.max_output_tokens = None;
    request.temperature = None;
    request.top_p = None;
    for forbidden in ["max_tokens", "max_output_tokens", "max_completion_tokens", "temperature", "top_p"] {
        request.extra.remove(forbidden);
    }
    request.stream = Some(true);
    request.store = Some(false);
    request.parallel_tool_calls = Some(true);
    if request.include.is_none() {
        request.include = Some(vec!["reasoning.encrypted_content".to_string()]);
    }
    true
}
