//! 内置原生驱动：Modbus RTU / Modbus TCP
//!
//! 驱动文件路径写成 `builtin:modbus_rtu` 或 `builtin:modbus_tcp` 时选中。
//! 测点来自驱动配置 `{"points":[...]}`；组帧在驱动内完成，收发走宿主 I/O。

use crate::error::DriverError;
use crate::host::HostIo;
use crate::modbus::{
    ModbusDataType, ModbusPoint, build_rtu_frame, build_tcp_frame, check_write_response,
    parse_rtu_frame, parse_tcp_frame, rtu_response_len,
};
use crate::plugin::NativeDriver;
use crate::types::{DEFAULT_FUNCTION, DriverContext, DriverPoint, DriverResult, PluginOutput, WRITE_FUNCTION};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// 内置驱动路径前缀
pub const BUILTIN_PREFIX: &str = "builtin:";

const BUILTIN_VERSION: &str = "1.0.0";
/// MBAP 响应上限（7 字节头 + 253 字节 PDU）
const TCP_RESPONSE_CAPACITY: usize = 260;
/// RTU 写响应 PDU 固定 5 字节
const WRITE_RESPONSE_PDU_LEN: usize = 5;

/// 原生驱动工厂
pub type BuiltinFactory = Arc<dyn Fn() -> Box<dyn NativeDriver> + Send + Sync>;

/// 默认注册的内置驱动
pub fn default_builtins() -> HashMap<String, BuiltinFactory> {
    let mut builtins: HashMap<String, BuiltinFactory> = HashMap::new();
    builtins.insert(
        "modbus_rtu".to_string(),
        Arc::new(|| Box::new(ModbusDriver::new(ModbusTransport::Rtu)) as Box<dyn NativeDriver>),
    );
    builtins.insert(
        "modbus_tcp".to_string(),
        Arc::new(|| Box::new(ModbusDriver::new(ModbusTransport::Tcp)) as Box<dyn NativeDriver>),
    );
    builtins
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusTransport {
    Rtu,
    Tcp,
}

#[derive(Debug, Default, Deserialize)]
struct ModbusConfig {
    #[serde(default)]
    points: Vec<ModbusPoint>,
}

pub struct ModbusDriver {
    transport: ModbusTransport,
    points: Vec<ModbusPoint>,
    transaction_id: u16,
}

impl ModbusDriver {
    pub fn new(transport: ModbusTransport) -> Self {
        Self {
            transport,
            points: Vec::new(),
            transaction_id: 0,
        }
    }

    fn slave(ctx: &DriverContext) -> u8 {
        ctx.config_value("device_address")
            .and_then(|value| value.parse::<u8>().ok())
            .unwrap_or(1)
    }

    fn exchange(
        &mut self,
        io: &mut HostIo,
        slave: u8,
        pdu: &[u8],
        expected_pdu_len: usize,
    ) -> Result<Vec<u8>, DriverError> {
        match self.transport {
            ModbusTransport::Rtu => {
                let frame = build_rtu_frame(slave, pdu);
                let reply = io.serial_transceive(&frame, rtu_response_len(expected_pdu_len), 0);
                if reply.is_empty() {
                    return Err(DriverError::ExecutionFailed(
                        "modbus: no response from slave".to_string(),
                    ));
                }
                Ok(parse_rtu_frame(slave, &reply)?.to_vec())
            }
            ModbusTransport::Tcp => {
                self.transaction_id = self.transaction_id.wrapping_add(1);
                let tid = self.transaction_id;
                let frame = build_tcp_frame(tid, slave, pdu);
                let reply = io.tcp_transceive(&frame, TCP_RESPONSE_CAPACITY, 0);
                if reply.is_empty() {
                    return Err(DriverError::ExecutionFailed(
                        "modbus: no response from server".to_string(),
                    ));
                }
                Ok(parse_tcp_frame(tid, &reply)?.to_vec())
            }
        }
    }

    fn read_points(&mut self, ctx: &DriverContext, io: &mut HostIo) -> DriverResult {
        let slave = Self::slave(ctx);
        let points = self.points.clone();
        let mut values = Vec::with_capacity(points.len());
        let mut errors = Vec::new();
        for point in points.iter().filter(|point| point.rw.contains('R')) {
            let outcome = self
                .exchange(io, slave, &point.read_pdu(), point.expected_response_pdu_len())
                .and_then(|pdu| point.decode(&pdu));
            match outcome {
                Ok(value) => values.push(DriverPoint {
                    field_name: point.field_name.clone(),
                    value: point_value(point, value),
                    rw: point.rw.clone(),
                }),
                Err(err) => errors.push(format!("{}: {}", point.field_name, err)),
            }
        }
        if values.is_empty() && !errors.is_empty() {
            return DriverResult::failed(errors.join("; "));
        }
        DriverResult::ok(values)
    }

    fn write_point(&mut self, ctx: &DriverContext, io: &mut HostIo) -> DriverResult {
        let Some(field_name) = ctx.config_value("field_name") else {
            return DriverResult::failed("field_name is required");
        };
        let Some(point) = self
            .points
            .iter()
            .find(|point| point.field_name == field_name)
            .cloned()
        else {
            return DriverResult::failed(format!("unknown point {}", field_name));
        };
        if !point.rw.contains('W') {
            return DriverResult::failed(format!("point {} is read-only", field_name));
        }
        let raw = ctx.config_value("value").unwrap_or_default();
        let Some(value) = parse_write_value(raw) else {
            return DriverResult::failed(format!("invalid value {:?}", raw));
        };
        let outcome = point.write_pdu(value).and_then(|request| {
            let reply = self.exchange(io, Self::slave(ctx), &request, WRITE_RESPONSE_PDU_LEN)?;
            check_write_response(&reply, &request)
        });
        match outcome {
            Ok(()) => DriverResult::ok(vec![DriverPoint {
                field_name: point.field_name.clone(),
                value: point_value(&point, value),
                rw: point.rw.clone(),
            }]),
            Err(err) => DriverResult::failed(err.to_string()),
        }
    }
}

impl NativeDriver for ModbusDriver {
    fn init(&mut self, config: &str) -> Result<(), DriverError> {
        if config.trim().is_empty() {
            self.points.clear();
            return Ok(());
        }
        let parsed: ModbusConfig = serde_json::from_str(config)
            .map_err(|err| DriverError::InvalidConfig(format!("modbus points: {}", err)))?;
        self.points = parsed.points;
        Ok(())
    }

    fn call(
        &mut self,
        function: &str,
        input: &[u8],
        io: &mut HostIo,
    ) -> Result<PluginOutput, DriverError> {
        let ctx: DriverContext = serde_json::from_slice(input)
            .map_err(|err| DriverError::InvalidConfig(format!("driver context: {}", err)))?;
        let result = match function {
            DEFAULT_FUNCTION => self.read_points(&ctx, io),
            WRITE_FUNCTION => self.write_point(&ctx, io),
            other => {
                return Err(DriverError::ExecutionFailed(format!(
                    "plugin function not found: {}",
                    other
                )));
            }
        };
        let output = serde_json::to_vec(&result)
            .map_err(|err| DriverError::BadOutput(err.to_string()))?;
        Ok(PluginOutput {
            rc: if result.success { 0 } else { 1 },
            output,
            error: result.error,
        })
    }

    fn function_exists(&self, name: &str) -> bool {
        name == DEFAULT_FUNCTION || name == WRITE_FUNCTION
    }

    fn functions(&self) -> Vec<String> {
        vec![DEFAULT_FUNCTION.to_string(), WRITE_FUNCTION.to_string()]
    }

    fn version(&self) -> Option<String> {
        Some(BUILTIN_VERSION.to_string())
    }
}

/// 整型点位输出整数，其余输出浮点
fn point_value(point: &ModbusPoint, value: f64) -> serde_json::Value {
    let integral = !matches!(
        point.data_type,
        ModbusDataType::Float32 | ModbusDataType::Float64
    ) && point.scale.is_none_or(|scale| scale == 1.0 || scale == 0.0);
    if integral && value.fract() == 0.0 && value.is_finite() {
        return serde_json::Value::from(value as i64);
    }
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn parse_write_value(raw: &str) -> Option<f64> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" => Some(1.0),
        "false" | "off" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_parses_points() {
        let mut driver = ModbusDriver::new(ModbusTransport::Tcp);
        driver
            .init(r#"{"points":[{"field_name":"temperature","address":0,"data_type":"float32"}]}"#)
            .expect("init");
        assert_eq!(driver.points.len(), 1);
        assert_eq!(driver.points[0].quantity(), 2);
        assert!(driver.init("{not json").is_err());
    }

    #[test]
    fn integral_points_stay_integers() {
        let point = ModbusPoint {
            field_name: "count".to_string(),
            address: 0,
            count: 0,
            data_type: ModbusDataType::Uint16,
            function_code: 3,
            scale: None,
            rw: "R".to_string(),
        };
        assert_eq!(point_value(&point, 42.0), serde_json::json!(42));
        let scaled = ModbusPoint {
            scale: Some(0.1),
            ..point
        };
        assert_eq!(point_value(&scaled, 4.2), serde_json::json!(4.2));
    }

    #[test]
    fn write_values_accept_booleans() {
        assert_eq!(parse_write_value("ON"), Some(1.0));
        assert_eq!(parse_write_value("false"), Some(0.0));
        assert_eq!(parse_write_value(" 12.5 "), Some(12.5));
        assert_eq!(parse_write_value("abc"), None);
    }

    #[test]
    fn unknown_function_is_rejected() {
        let mut driver = ModbusDriver::new(ModbusTransport::Rtu);
        let input = serde_json::to_vec(&DriverContext::default()).expect("encode");
        let err = driver
            .call("reset", &input, &mut HostIo::default())
            .expect_err("unknown");
        assert!(matches!(err, DriverError::ExecutionFailed(_)));
    }
}
