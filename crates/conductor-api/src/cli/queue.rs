//! Queue commands: enqueue a run request and report the backlog.

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value, json};

use conductor_types::queue::{MessagePriority, QueueMessage};

use crate::state::AppState;

/// Publish a run request for `workflow`.
pub async fn enqueue(
    state: &AppState,
    workflow: &str,
    priority: &str,
    inputs: &[String],
    json: bool,
) -> Result<()> {
    let priority: MessagePriority = priority.parse().map_err(|e: String| anyhow!(e))?;
    let payload = parse_inputs(inputs)?;

    let message = QueueMessage::new(workflow, Value::Object(payload))
        .with_priority(priority)
        .with_max_attempts(state.config.queue.default_max_attempts);
    let id = state.queue.publish(message).await?;

    tracing::info!(message_id = %id, workflow, priority = priority.as_str(), "run enqueued");

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "id": id,
                "workflow_id": workflow,
                "priority": priority,
            }))?
        );
    } else {
        println!("Enqueued {workflow} ({}) as {id}", priority.as_str());
    }
    Ok(())
}

pub async fn queue_length(state: &AppState, json: bool) -> Result<()> {
    let pending = state.queue.queue_length().await?;
    if json {
        println!("{}", json!({ "pending": pending }));
    } else {
        println!("{pending}");
    }
    Ok(())
}

/// Parse `key=value` pairs into a JSON object.
///
/// Values that parse as JSON keep their type (`n=3` is a number); anything
/// else is taken as a string.
pub fn parse_inputs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid input '{pair}', expected key=value");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid input '{pair}', key is empty");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_inputs_keeps_json_types() {
        let map = parse_inputs(&pairs(&["n=3", "flag=true", "name=alice", "list=[1,2]"])).unwrap();
        assert_eq!(map["n"], json!(3));
        assert_eq!(map["flag"], json!(true));
        assert_eq!(map["name"], json!("alice"));
        assert_eq!(map["list"], json!([1, 2]));
    }

    #[test]
    fn parse_inputs_splits_on_first_equals() {
        let map = parse_inputs(&pairs(&["expr=a=b"])).unwrap();
        assert_eq!(map["expr"], json!("a=b"));
    }

    #[test]
    fn parse_inputs_empty_value_is_empty_string() {
        let map = parse_inputs(&pairs(&["k="])).unwrap();
        assert_eq!(map["k"], json!(""));
    }

    #[test]
    fn parse_inputs_rejects_malformed_pairs() {
        assert!(parse_inputs(&pairs(&["novalue"])).is_err());
        assert!(parse_inputs(&pairs(&["=1"])).is_err());
    }
}
