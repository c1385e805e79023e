//! 插件输出解析与字段映射

use crate::error::DriverError;
use crate::types::{DriverResult, PluginOutput};
use serde::Deserialize;
use std::collections::BTreeMap;

/// 解析插件输出为信封；空输出视为 PluginEmptyOutput。
pub fn parse_output(output: PluginOutput) -> Result<DriverResult, DriverError> {
    if output.output.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DriverError::PluginEmptyOutput(output.error));
    }
    let mut result: DriverResult = serde_json::from_slice(&output.output).map_err(|err| {
        let preview = String::from_utf8_lossy(&output.output[..output.output.len().min(512)])
            .into_owned();
        DriverError::BadOutput(format!("{} (output: {})", err, preview))
    })?;
    if result.timestamp <= 0 {
        result.timestamp = domain::now_epoch_ms();
    }
    Ok(result)
}

/// points 非空时优先，否则原样使用 data。
pub fn map_result_fields(result: &DriverResult) -> BTreeMap<String, String> {
    if !result.points.is_empty() {
        return result
            .points
            .iter()
            .filter(|point| !point.field_name.is_empty())
            .map(|point| (point.field_name.clone(), format_driver_value(&point.value)))
            .collect();
    }
    result
        .data
        .iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// 按类型字符串化测点值。
pub fn format_driver_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(v) => v.to_string(),
        serde_json::Value::String(v) => v.clone(),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                v.to_string()
            } else if let Some(v) = n.as_u64() {
                v.to_string()
            } else {
                format!("{:.6}", n.as_f64().unwrap_or_default())
            }
        }
        // 字节数组按原始字符串处理
        serde_json::Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            match bytes {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => value.to_string(),
            }
        }
        serde_json::Value::Object(_) => value.to_string(),
    }
}

#[derive(Deserialize)]
struct VersionPayload {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    version: String,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    error: String,
}

/// 解析 `version` 导出函数的输出 `{success, version}`。
pub fn parse_version_output(output: &[u8]) -> Result<String, DriverError> {
    if output.is_empty() {
        return Err(DriverError::PluginEmptyOutput("version".to_string()));
    }
    let payload: VersionPayload =
        serde_json::from_slice(output).map_err(|err| DriverError::BadOutput(err.to_string()))?;
    if !payload.success {
        let message = if payload.error.is_empty() {
            "version response not success".to_string()
        } else {
            payload.error
        };
        return Err(DriverError::ExecutionFailed(message));
    }
    if !payload.version.is_empty() {
        return Ok(payload.version);
    }
    Ok(match payload.data.get("version") {
        Some(serde_json::Value::String(v)) => v.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DriverPoint;
    use serde_json::json;

    fn output(text: &str) -> PluginOutput {
        PluginOutput {
            rc: 0,
            output: text.as_bytes().to_vec(),
            error: String::new(),
        }
    }

    #[test]
    fn points_win_over_data() {
        let result = parse_output(output(
            r#"{"success":true,"points":[{"field_name":"temperature","value":25.5,"rw":"R"}],"data":{"old":"1"}}"#,
        ))
        .expect("parse");
        let fields = map_result_fields(&result);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["temperature"], "25.500000");
    }

    #[test]
    fn data_used_when_points_empty() {
        let result = parse_output(output(r#"{"success":true,"data":{"hum":"60.1"}}"#))
            .expect("parse");
        assert_eq!(map_result_fields(&result)["hum"], "60.1");
        assert!(result.timestamp > 0);
    }

    #[test]
    fn values_are_stringified_by_type() {
        assert_eq!(format_driver_value(&json!(true)), "true");
        assert_eq!(format_driver_value(&json!(42)), "42");
        assert_eq!(format_driver_value(&json!(-7)), "-7");
        assert_eq!(format_driver_value(&json!(1.0)), "1.000000");
        assert_eq!(format_driver_value(&json!("on")), "on");
        assert_eq!(format_driver_value(&json!(null)), "");
        assert_eq!(format_driver_value(&json!([79, 75])), "OK");
    }

    #[test]
    fn mapping_is_deterministic() {
        let result = DriverResult::ok(vec![
            DriverPoint {
                field_name: "b".to_string(),
                value: json!(2),
                rw: "R".to_string(),
            },
            DriverPoint {
                field_name: "a".to_string(),
                value: json!(1.25),
                rw: "R".to_string(),
            },
        ]);
        assert_eq!(map_result_fields(&result), map_result_fields(&result));
    }

    #[test]
    fn empty_output_keeps_plugin_error() {
        let err = parse_output(PluginOutput {
            rc: 1,
            output: Vec::new(),
            error: "no response".to_string(),
        })
        .expect_err("empty");
        assert!(matches!(err, DriverError::PluginEmptyOutput(ref msg) if msg == "no response"));
    }

    #[test]
    fn garbage_output_is_bad_output() {
        let err = parse_output(output("not json")).expect_err("bad");
        assert!(matches!(err, DriverError::BadOutput(_)));
    }

    #[test]
    fn version_from_data_map() {
        let version =
            parse_version_output(br#"{"success":true,"data":{"version":"1.2.0"}}"#).expect("v");
        assert_eq!(version, "1.2.0");
    }
}
