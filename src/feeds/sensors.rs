//! Hardware monitor tree: `{Text, Type, Value, Children: [...]}` nodes.

use serde_json::Value;

const CPU_TEMP_NAMES: [&str; 3] = ["CPU Package", "Core (Tctl/Tdie)", "Core Average"];
const SAMPLE_LIMIT: usize = 25;

/// Depth-first search for the first node with this type and label.
pub fn find_sensor<'a>(node: &'a Value, kind: &str, name: &str) -> Option<&'a Value> {
    if node["Text"].as_str() == Some(name) && node["Type"].as_str() == Some(kind) {
        return Some(node);
    }
    node["Children"]
        .as_array()?
        .iter()
        .find_map(|child| find_sensor(child, kind, name))
}

/// First signed decimal in a reading such as `"54,5 °C"` or `"12 %"`.
pub fn parse_reading(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => return n.as_f64(),
        // "1,234.5" groups thousands; a lone comma is a decimal separator.
        Value::String(s) if s.contains('.') => s.trim().replace(',', ""),
        Value::String(s) => s.trim().replacen(',', ".", 1),
        _ => return None,
    };
    let bytes = raw.as_bytes();
    let start = bytes.iter().position(u8::is_ascii_digit)?;
    let negative = start > 0 && bytes[start - 1] == b'-';
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    let from = if negative { start - 1 } else { start };
    raw[from..end].parse().ok()
}

/// `Type:Text` labels of every sensor in the tree, for diagnosing name mismatches.
pub fn sample_labels(root: &Value) -> Vec<String> {
    fn walk(node: &Value, out: &mut Vec<String>) {
        if out.len() >= SAMPLE_LIMIT {
            return;
        }
        if let (Some(kind), Some(text)) = (node["Type"].as_str(), node["Text"].as_str()) {
            out.push(format!("{}:{}", kind, text));
        }
        if let Some(children) = node["Children"].as_array() {
            for child in children {
                walk(child, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, &mut out);
    out.truncate(SAMPLE_LIMIT);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcReadings {
    pub cpu_temp: Option<i64>,
    pub gpu_temp: Option<i64>,
    pub gpu_hotspot: Option<i64>,
    pub cpu_load: Option<i64>,
    pub gpu_load: Option<i64>,
}

impl PcReadings {
    pub fn from_tree(root: &Value) -> Self {
        let read = |kind: &str, name: &str| {
            find_sensor(root, kind, name)
                .and_then(|n| parse_reading(&n["Value"]))
                .map(|v| v.round() as i64)
        };
        let cpu_temp = CPU_TEMP_NAMES
            .iter()
            .find_map(|name| find_sensor(root, "Temperature", name))
            .and_then(|n| parse_reading(&n["Value"]))
            .map(|v| v.round() as i64);
        Self {
            cpu_temp,
            gpu_temp: read("Temperature", "GPU Core"),
            gpu_hotspot: read("Temperature", "GPU Hot Spot"),
            cpu_load: read("Load", "CPU Total"),
            gpu_load: read("Load", "GPU Core"),
        }
    }

    /// GPU at 60° or CPU at 70° and above.
    pub fn is_gaming(&self) -> bool {
        self.gpu_temp.is_some_and(|t| t >= 60) || self.cpu_temp.is_some_and(|t| t >= 70)
    }

    /// Neither temperature was found under the expected labels.
    pub fn sensors_missing(&self) -> bool {
        self.cpu_temp.is_none() && self.gpu_temp.is_none()
    }
}

/// Position of a temperature on the 20..100° gauge, 0.0 to 1.0.
pub fn gauge_fraction(temp: Option<i64>) -> f64 {
    match temp {
        Some(t) => ((t as f64 - 20.0) / 80.0).clamp(0.0, 1.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "Text": "Sensor", "Children": [
                {"Text": "DESKTOP", "Children": [
                    {"Text": "AMD Ryzen 7", "Children": [
                        {"Text": "Temperatures", "Children": [
                            {"Text": "Core (Tctl/Tdie)", "Type": "Temperature", "Value": "71,4 °C", "Children": []}
                        ]},
                        {"Text": "Load", "Children": [
                            {"Text": "CPU Total", "Type": "Load", "Value": "23.6 %", "Children": []}
                        ]}
                    ]},
                    {"Text": "NVIDIA", "Children": [
                        {"Text": "GPU Core", "Type": "Temperature", "Value": "55.0 °C", "Children": []},
                        {"Text": "GPU Hot Spot", "Type": "Temperature", "Value": "66.2 °C", "Children": []},
                        {"Text": "GPU Core", "Type": "Load", "Value": "97 %", "Children": []}
                    ]}
                ]}
            ]
        })
    }

    #[test]
    fn finds_by_type_and_label() {
        let t = tree();
        let load = find_sensor(&t, "Load", "GPU Core").unwrap();
        assert_eq!(load["Value"], "97 %");
        assert!(find_sensor(&t, "Clock", "GPU Core").is_none());
    }

    #[test]
    fn readings_fall_back_through_cpu_names() {
        let r = PcReadings::from_tree(&tree());
        assert_eq!(r.cpu_temp, Some(71));
        assert_eq!(r.gpu_temp, Some(55));
        assert_eq!(r.gpu_hotspot, Some(66));
        assert_eq!(r.cpu_load, Some(24));
        assert_eq!(r.gpu_load, Some(97));
        assert!(r.is_gaming());
        assert!(!r.sensors_missing());
    }

    #[test]
    fn reading_parser() {
        assert_eq!(parse_reading(&json!("54,5 °C")), Some(54.5));
        assert_eq!(parse_reading(&json!("-3.25 V")), Some(-3.25));
        assert_eq!(parse_reading(&json!("12. %")), Some(12.0));
        assert_eq!(parse_reading(&json!("1,234.5 RPM")), Some(1234.5));
        assert_eq!(parse_reading(&json!("1,234")), Some(1.234));
        assert_eq!(parse_reading(&json!(40)), Some(40.0));
        assert_eq!(parse_reading(&json!("n/a")), None);
        assert_eq!(parse_reading(&json!(null)), None);
    }

    #[test]
    fn unknown_tree_reports_missing_sensors() {
        let r = PcReadings::from_tree(&json!({"Text": "x", "Children": []}));
        assert!(r.sensors_missing());
        assert!(!r.is_gaming());
        assert_eq!(sample_labels(&tree()).len(), 5);
    }

    #[test]
    fn gauge_is_clamped() {
        assert_eq!(gauge_fraction(Some(60)), 0.5);
        assert_eq!(gauge_fraction(Some(120)), 1.0);
        assert_eq!(gauge_fraction(None), 0.0);
    }
}
