// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Home-automation context: detection of home-automation goals, parsing
//! of `GetLiveContext` output into a uniform device list, and goal
//! enrichment with live device data.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Home Assistant tool names whose presence in the history marks a task
/// as home automation.
pub const HASS_TOOLS: &[&str] = &[
    "HassGetLiveContext",
    "HassTurnOn",
    "HassTurnOff",
    "HassSetPosition",
    "HassGetState",
    "HassListEntities",
    "HassSetTemperature",
    "HassSetBrightness",
];

const HOME_ACTION_KEYWORDS: &[&str] = &[
    "打开", "关闭", "调节", "设置", "控制", "开启", "关掉", "关上", "启动", "停止", "拉上",
    "拉开", "调整", "增加", "减少",
    "open", "close", "adjust", "set ", "turn on", "turn off", "dim", "raise", "lower",
];
const HOME_ENTITY_KEYWORDS: &[&str] = &[
    "灯", "空调", "设备", "风扇", "温度", "亮度", "暖气", "加湿器", "窗帘", "门窗", "百叶窗",
    "床帘", "电视", "插座",
    "light", "lamp", "curtain", "blind", "cover", "climate", "fan", "heater", "humidifier",
    "thermostat", "socket", "plug", "tv",
];

/// An utterance is a home-automation request when it pairs an action word
/// with a device word.
pub fn has_home_intent(text: &str) -> bool {
    let t = text.to_lowercase();
    let has_action = HOME_ACTION_KEYWORDS.iter().any(|k| t.contains(k));
    let has_entity = HOME_ENTITY_KEYWORDS.iter().any(|k| t.contains(k));
    has_action && has_entity
}

fn device_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"-\s+names:\s+([^\n]+)\n\s+domain:\s+(\w+)\n\s+state:\s+([^\n]+)(?:\n\s+areas:\s+([^\n]+))?(?:\n\s+attributes:([^-]*))?",
        )
        .expect("static device pattern")
    })
}

fn position_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"current_position:\s*'?([^'\n]+)'?").expect("static position pattern")
    })
}

fn ascii_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static name pattern"))
}

/// Parse a `GetLiveContext` response into `(devices, areas)`.
///
/// Accepts (a) the MCP content envelope whose first text item holds a
/// YAML-ish device dump (the Home Assistant shape, possibly wrapped in a
/// `{"result": "..."}` JSON string), or (b) a plain `{entities: [...]}`
/// list.  Devices come out as uniform
/// `{entity_id, friendly_name, area, state, device_type, position?}`.
pub fn parse_live_context(raw: &Value) -> (Vec<Value>, Vec<String>) {
    // Step 1: find the text payload.
    let mut text: Option<String> = None;
    match raw {
        Value::Object(map) => {
            if let Some(content) = map.get("content").and_then(Value::as_array) {
                if let Some(t) = content
                    .first()
                    .and_then(|item| item.get("text"))
                    .and_then(Value::as_str)
                {
                    text = Some(t.to_string());
                }
            } else if map.contains_key("entities") || map.contains_key("devices") {
                return parse_entities_dict(raw);
            }
        }
        Value::String(s) => text = Some(s.clone()),
        _ => {}
    }

    let Some(mut text) = text else {
        return (Vec::new(), Vec::new());
    };

    // Step 2: the text may itself be JSON with a nested `result` string.
    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
        if let Some(result) = parsed.get("result").and_then(Value::as_str) {
            text = result.to_string();
        } else if parsed.get("entities").is_some() || parsed.get("devices").is_some() {
            return parse_entities_dict(&parsed);
        }
    }

    // Step 3: extract YAML-ish device blocks.
    let mut devices = Vec::new();
    let mut areas = Vec::new();
    for caps in device_pattern().captures_iter(&text) {
        let names: Vec<String> = caps[1]
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let friendly_name = names.first().cloned().unwrap_or_default();
        let domain = caps[2].trim().to_string();
        let state = caps[3]
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();

        // Prefer a pure-ASCII alias as the entity slug.
        let entity_name = names
            .iter()
            .find(|n| ascii_name_pattern().is_match(n))
            .map(|n| n.to_lowercase().replace([' ', '-'], "_"))
            .unwrap_or_else(|| friendly_name.to_lowercase().replace(' ', "_"));
        let entity_id = format!("{domain}.{entity_name}");

        let device_areas: Vec<String> = caps
            .get(4)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let primary_area = device_areas.first().cloned().unwrap_or_default();

        let mut device = json!({
            "entity_id": entity_id,
            "friendly_name": friendly_name,
            "area": primary_area,
            "state": state,
            "device_type": domain,
        });
        if let Some(attrs) = caps.get(5) {
            if let Some(pos) = position_pattern().captures(attrs.as_str()) {
                device["position"] = Value::String(pos[1].trim().to_string());
            }
        }
        devices.push(device);

        for area in device_areas {
            if !areas.contains(&area) {
                areas.push(area);
            }
        }
    }

    (devices, areas)
}

/// Parse the plain `{entities: [...]}` (or `{devices: [...]}`) shape.
fn parse_entities_dict(data: &Value) -> (Vec<Value>, Vec<String>) {
    let mut devices = Vec::new();
    let mut areas = Vec::new();

    let entities = data
        .get("entities")
        .or_else(|| data.get("devices"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for entity in entities {
        let entity_id = entity
            .get("entity_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let friendly_name = entity
            .get("friendly_name")
            .or_else(|| entity.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let area = entity
            .get("area")
            .or_else(|| entity.get("area_name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let state = entity
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let device_type = entity
            .get("device_type")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                entity_id.split('.').next().unwrap_or_default().to_string()
            });

        if !area.is_empty() && !areas.contains(&area) {
            areas.push(area.clone());
        }
        devices.push(json!({
            "entity_id": entity_id,
            "friendly_name": friendly_name,
            "area": area,
            "state": state,
            "device_type": device_type,
        }));
    }

    (devices, areas)
}

/// Render the first ten devices as prompt lines.
pub fn device_lines(devices: &[Value]) -> Vec<String> {
    devices
        .iter()
        .take(10)
        .map(|device| {
            let entity_id = device["entity_id"].as_str().unwrap_or_default();
            let friendly = device["friendly_name"].as_str().unwrap_or_default();
            let area = device["area"].as_str().unwrap_or_default();
            let state = device["state"].as_str().unwrap_or_default();

            let mut line = format!("- entity_id: {entity_id}");
            if !friendly.is_empty() {
                line.push_str(&format!(" (friendly name: {friendly}"));
                if !area.is_empty() {
                    line.push_str(&format!(", area: {area}"));
                }
                if !state.is_empty() {
                    line.push_str(&format!(", state: {state}"));
                }
                if device["device_type"] == "cover" {
                    if let Some(pos) = device["position"].as_str() {
                        line.push_str(&format!(", position: {pos}"));
                    }
                }
                line.push(')');
            }
            line
        })
        .collect()
}

/// Append live device data and a parameter rubric to a goal.
pub fn enhance_goal_with_devices(goal: &str, devices: &[Value]) -> String {
    if devices.is_empty() {
        return goal.to_string();
    }
    let lines = device_lines(devices).join("\n");
    format!(
        r#"{goal}

[Available devices]
{lines}

[Parameter rules]
1. Always use an actual entity_id from the device list, never a fuzzy user-provided name.
2. An area parameter must be an actual area name from the device data; placeholders like "current location" are forbidden.
3. For a name parameter prefer entity_id, then the friendly name.
4. Cover positions range 0-100: 0 means fully closed, 100 means fully open.

[Objective]
Match the best device from the list for the request "{goal}" and call the appropriate tool."#
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DUMP: &str = "- names: Living Room Main, 客厅主灯\n  domain: light\n  state: 'off'\n  areas: 客厅\n- names: bedroom-curtain\n  domain: cover\n  state: open\n  areas: 卧室\n  attributes:\n    current_position: '80'\n";

    #[test]
    fn home_intent_requires_action_and_entity() {
        assert!(has_home_intent("打开客厅的灯"));
        assert!(has_home_intent("please turn off the bedroom light"));
        assert!(!has_home_intent("打开一下"));
        assert!(!has_home_intent("那盏灯真好看"));
    }

    #[test]
    fn parse_yaml_dump() {
        let raw = serde_json::json!({ "content": [{ "text": SAMPLE_DUMP }] });
        let (devices, areas) = parse_live_context(&raw);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["entity_id"], "light.living_room_main");
        assert_eq!(devices[0]["friendly_name"], "Living Room Main");
        assert_eq!(devices[0]["state"], "off");
        assert_eq!(devices[0]["area"], "客厅");
        assert_eq!(devices[1]["device_type"], "cover");
        assert_eq!(devices[1]["position"], "80");
        assert_eq!(areas, vec!["客厅".to_string(), "卧室".to_string()]);
    }

    #[test]
    fn parse_nested_result_string() {
        let wrapped = serde_json::json!({ "result": SAMPLE_DUMP }).to_string();
        let raw = serde_json::json!({ "content": [{ "text": wrapped }] });
        let (devices, _) = parse_live_context(&raw);
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn parse_entities_list() {
        let raw = serde_json::json!({
            "entities": [
                { "entity_id": "light.kitchen", "friendly_name": "Kitchen", "area": "kitchen", "state": "on" }
            ]
        });
        let (devices, areas) = parse_live_context(&raw);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["device_type"], "light");
        assert_eq!(areas, vec!["kitchen".to_string()]);
    }

    #[test]
    fn parse_garbage_yields_nothing() {
        let (devices, areas) = parse_live_context(&serde_json::json!(42));
        assert!(devices.is_empty());
        assert!(areas.is_empty());
    }

    #[test]
    fn enhanced_goal_includes_devices_and_rules() {
        let raw = serde_json::json!({ "content": [{ "text": SAMPLE_DUMP }] });
        let (devices, _) = parse_live_context(&raw);
        let goal = enhance_goal_with_devices("打开客厅的灯", &devices);
        assert!(goal.contains("light.living_room_main"));
        assert!(goal.contains("[Parameter rules]"));
        assert!(goal.contains("0 means fully closed"));
        assert!(goal.contains("call the appropriate tool."));
    }

    #[test]
    fn enhanced_goal_unchanged_without_devices() {
        assert_eq!(enhance_goal_with_devices("hello", &[]), "hello");
    }

    #[test]
    fn device_lines_cap_at_ten() {
        let devices: Vec<Value> = (0..15)
            .map(|i| {
                serde_json::json!({
                    "entity_id": format!("light.l{i}"),
                    "friendly_name": format!("L{i}"),
                    "area": "a",
                    "state": "off",
                    "device_type": "light",
                })
            })
            .collect();
        assert_eq!(device_lines(&devices).len(), 10);
    }
}
