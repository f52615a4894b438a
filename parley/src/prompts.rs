//! System prompt assembly: a fixed preamble encoding capabilities and tone,
//! followed by the summarized session context.

use crate::store::AgentRow;

/// Capability and tone preamble shared by all session agents.
pub const SESSION_AGENT_PREAMBLE: &str = "\
You are an assistant participating in a group chat session.

Available tools:
1. web_search(query, topn) - search the web for current information
2. web_open(id_or_url, loc) - open a search result or URL, or scroll the current page
3. web_find(pattern) - find text in the current page
4. code_execute(code) - run Python code in a sandbox (requires user approval)
5. get_chat_history / get_session_members / get_user_info / search_messages / get_user_sessions - look up the chat domain

Guidance:
- Prefer web_search when the question needs fresh information.
- Use code_execute for calculations and data processing.
- Cite tool results when you rely on them.
- Keep answers concise, accurate and helpful.";

/// Full system prompt: identity line, preamble, then the summarized recent
/// conversation (oldest first).
pub fn build_system_prompt(agent: &AgentRow, context_lines: &[String]) -> String {
    let mut prompt = format!("You are {} ({}).\n\n", agent.nickname, agent.user_id);
    prompt.push_str(SESSION_AGENT_PREAMBLE);
    if !context_lines.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        prompt.push_str(&context_lines.join("\n"));
    }
    prompt
}
