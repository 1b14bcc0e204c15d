// Reply format: <thoughts>, <plan>, <action>, <plan_update>, <emotion_update>.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::PlanState;
use crate::actions::ActionCall;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<([A-Za-z_][A-Za-z0-9_]*)\s*(/?)>(.*)$").unwrap());

static CHILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<([A-Za-z_][A-Za-z0-9_]*)>(.*?)</([A-Za-z_][A-Za-z0-9_]*)>").unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub enum PlanUpdate {
    NoChange,
    Replace(PlanState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub thoughts: Option<String>,
    pub plan: Option<String>,
    pub action: Option<ActionCall>,
    pub plan_update: PlanUpdate,
    pub emotion_update: Option<String>,
}

/// Split a raw reply into its sections.
///
/// A missing or malformed action block is not an error, it just means the
/// agent did nothing. An unreadable plan update or an empty reply is.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, String> {
    if raw.trim().is_empty() {
        return Err("empty response".to_string());
    }

    let plan_update = match section(raw, "plan_update") {
        Some(body) if !is_no_change(&body) => {
            let plan: PlanState = serde_json::from_str(&body)
                .map_err(|e| format!("invalid plan update: {}", e))?;
            PlanUpdate::Replace(plan)
        }
        _ => PlanUpdate::NoChange,
    };

    let emotion_update = section(raw, "emotion_update").filter(|body| !is_no_change(body));

    Ok(ParsedResponse {
        thoughts: section(raw, "thoughts"),
        plan: section(raw, "plan"),
        action: section(raw, "action").and_then(|block| parse_action_block(&block)),
        plan_update,
        emotion_update,
    })
}

fn is_no_change(body: &str) -> bool {
    let lowered = body.trim().to_lowercase();
    lowered.is_empty() || lowered == "no change" || lowered == "none"
}

/// Trimmed body of the first `<tag>...</tag>` section.
fn section(raw: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = raw.find(&open)? + open.len();
    let end = raw[start..].find(&close)? + start;
    Some(raw[start..end].trim().to_string())
}

/// Exactly one element naming the action, whose children are its fields.
pub fn parse_action_block(block: &str) -> Option<ActionCall> {
    let block = block.trim();
    let caps = OPEN_TAG.captures(block)?;
    let name = caps.get(1)?.as_str();

    if !caps.get(2)?.as_str().is_empty() {
        // <name/> carries no fields and must be the whole block
        return caps.get(3)?.as_str().trim().is_empty().then(|| ActionCall::new(name));
    }

    let rest = caps.get(3)?.as_str();
    let close = format!("</{}>", name);
    let inner = rest.strip_suffix(&close)?;

    let mut fields = BTreeMap::new();
    let mut leftover = String::new();
    let mut cursor = 0;
    for child in CHILD.captures_iter(inner) {
        let whole = child.get(0)?;
        if child.get(1)?.as_str() != child.get(3)?.as_str() {
            return None;
        }
        leftover.push_str(&inner[cursor..whole.start()]);
        cursor = whole.end();
        fields.insert(
            child.get(1)?.as_str().to_string(),
            child.get(2)?.as_str().trim().to_string(),
        );
    }
    leftover.push_str(&inner[cursor..]);

    if !leftover.trim().is_empty() {
        return None;
    }

    Some(ActionCall { name: name.to_string(), fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let raw = "<thoughts>hm</thoughts>\n<plan>talk</plan>\n\
                   <action><speak><content>Hello all</content></speak></action>\n\
                   <plan_update>{\"goals\": [\"win\"], \"strategy\": \"be nice\"}</plan_update>\n\
                   <emotion_update>cheerful</emotion_update>";
        let parsed = parse_response(raw).unwrap();

        assert_eq!(parsed.thoughts.as_deref(), Some("hm"));
        let action = parsed.action.unwrap();
        assert_eq!(action.name, "speak");
        assert_eq!(action.field("content"), Some("Hello all"));
        match parsed.plan_update {
            PlanUpdate::Replace(plan) => {
                assert_eq!(plan.goals, vec!["win".to_string()]);
                assert_eq!(plan.strategy, "be nice");
                assert!(plan.milestones.is_empty());
            }
            PlanUpdate::NoChange => panic!("expected plan replacement"),
        }
        assert_eq!(parsed.emotion_update.as_deref(), Some("cheerful"));
    }

    #[test]
    fn test_no_change_markers() {
        let raw = "<action><yield/></action><plan_update>no change</plan_update><emotion_update>No Change</emotion_update>";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.action.unwrap().name, "yield");
        assert_eq!(parsed.plan_update, PlanUpdate::NoChange);
        assert!(parsed.emotion_update.is_none());
    }

    #[test]
    fn test_malformed_action_is_empty_not_error() {
        let parsed = parse_response("<action><speak>loose text</speak></action>").unwrap();
        assert!(parsed.action.is_none());

        let parsed = parse_response("<action><speak></speak><yield></yield></action>").unwrap();
        assert!(parsed.action.is_none());

        let parsed = parse_response("just chatting").unwrap();
        assert!(parsed.action.is_none());
    }

    #[test]
    fn test_mismatched_child_rejected() {
        assert!(parse_action_block("<speak><content>x</other></speak>").is_none());
    }

    #[test]
    fn test_bad_plan_update_is_error() {
        assert!(parse_response("<plan_update>{not json</plan_update>").is_err());
        assert!(parse_response("   ").is_err());
    }
}
