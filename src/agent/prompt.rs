use super::Agent;
use crate::llm::ChatMessage;

const RESPONSE_FORMAT: &str = "Reply with these sections:\n\
<thoughts>your private reasoning</thoughts>\n\
<plan>what you intend to do next</plan>\n\
<action><action_name><field>value</field></action_name></action> (exactly one action, or leave the block out to stay silent)\n\
<plan_update>no change, or a JSON object {\"goals\": [], \"milestones\": [], \"strategy\": \"\", \"notes\": \"\"} replacing your whole plan</plan_update>\n\
<emotion_update>no change, or a single word</emotion_update>";

pub fn system_prompt(agent: &Agent) -> String {
    let mut prompt = format!("You are {}.", agent.name());

    if let Some(role) = agent.property_str("role") {
        prompt.push_str(&format!(" Your role: {}.", role));
    }

    let extra: Vec<String> = agent
        .properties()
        .iter()
        .filter(|(key, _)| key.as_str() != "role")
        .map(|(key, value)| match value.as_str() {
            Some(text) => format!("- {}: {}", key, text),
            None => format!("- {}: {}", key, value),
        })
        .collect();
    if !extra.is_empty() {
        prompt.push_str("\n\nYour attributes:\n");
        prompt.push_str(&extra.join("\n"));
    }

    if !agent.guidelines().is_empty() {
        prompt.push_str("\n\nGuidelines:\n");
        prompt.push_str(agent.guidelines());
    }

    if !agent.action_space().is_empty() {
        prompt.push_str("\n\nAvailable actions:\n");
        for spec in agent.action_space() {
            prompt.push_str(&spec.render());
            prompt.push('\n');
        }
    }

    prompt.push_str("\nCurrent plan:\n");
    prompt.push_str(&agent.plan_state().render());
    prompt.push_str(&format!("\nCurrent emotion: {}\n\n", agent.emotion()));
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// System prompt followed by the agent's memory.
pub fn build_messages(agent: &Agent) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(agent.short_memory().len() + 1);
    messages.push(ChatMessage::system(system_prompt(agent)));
    messages.extend(agent.short_memory().iter().cloned());
    messages
}
