//! Modbus 帧构造与解析（RTU CRC16 / TCP MBAP）
//!
//! 内置驱动自己组帧，宿主只负责收发字节。

use crate::error::DriverError;
use serde::{Deserialize, Serialize};

/// 寄存器数据类型（寄存器高位在前）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    #[default]
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    /// 线圈/离散输入
    Bool,
}

impl ModbusDataType {
    /// 占用的寄存器数量
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 | Self::Bool => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

/// 测点定义（驱动配置 `{"points":[...]}` 中的一项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusPoint {
    pub field_name: String,
    pub address: u16,
    #[serde(default)]
    pub count: u16,
    #[serde(default)]
    pub data_type: ModbusDataType,
    #[serde(default = "default_function_code")]
    pub function_code: u8,
    #[serde(default)]
    pub scale: Option<f64>,
    /// R / W / RW
    #[serde(default = "default_rw")]
    pub rw: String,
}

fn default_function_code() -> u8 {
    3
}

fn default_rw() -> String {
    "R".to_string()
}

impl ModbusPoint {
    /// 实际读取数量：未配置时按数据类型推断
    pub fn quantity(&self) -> u16 {
        if self.count > 0 {
            self.count
        } else {
            self.data_type.register_count()
        }
    }

    fn is_bit(&self) -> bool {
        matches!(self.function_code, 1 | 2)
    }

    /// 读请求 PDU
    pub fn read_pdu(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code];
        pdu.extend_from_slice(&self.address.to_be_bytes());
        pdu.extend_from_slice(&self.quantity().to_be_bytes());
        pdu
    }

    /// 读响应 PDU 的期望长度
    pub fn expected_response_pdu_len(&self) -> usize {
        let quantity = self.quantity() as usize;
        if self.is_bit() {
            2 + quantity.div_ceil(8)
        } else {
            2 + quantity * 2
        }
    }

    /// 从响应 PDU 解码数值（已乘 scale）
    pub fn decode(&self, pdu: &[u8]) -> Result<f64, DriverError> {
        check_exception(pdu, self.function_code)?;
        if pdu.len() < 2 {
            return Err(modbus_error("response too short"));
        }
        let byte_count = pdu[1] as usize;
        let payload = pdu
            .get(2..2 + byte_count)
            .ok_or_else(|| modbus_error("byte count exceeds response"))?;
        let raw = if self.is_bit() {
            let first = payload.first().ok_or_else(|| modbus_error("empty bit payload"))?;
            (first & 0x01) as f64
        } else {
            let registers: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            parse_registers(&registers, self.data_type)?
        };
        Ok(match self.scale {
            Some(scale) if scale != 0.0 => raw * scale,
            _ => raw,
        })
    }

    /// 写请求 PDU：线圈用 0x05，单寄存器用 0x06，多寄存器用 0x10
    pub fn write_pdu(&self, value: f64) -> Result<Vec<u8>, DriverError> {
        let raw = match self.scale {
            Some(scale) if scale != 0.0 => value / scale,
            _ => value,
        };
        if self.is_bit() || self.data_type == ModbusDataType::Bool {
            let mut pdu = vec![0x05];
            pdu.extend_from_slice(&self.address.to_be_bytes());
            pdu.extend_from_slice(if raw != 0.0 { &[0xFF, 0x00] } else { &[0x00, 0x00] });
            return Ok(pdu);
        }
        let registers = encode_registers(raw, self.data_type);
        if registers.len() == 1 {
            let mut pdu = vec![0x06];
            pdu.extend_from_slice(&self.address.to_be_bytes());
            pdu.extend_from_slice(&registers[0].to_be_bytes());
            return Ok(pdu);
        }
        let mut pdu = vec![0x10];
        pdu.extend_from_slice(&self.address.to_be_bytes());
        pdu.extend_from_slice(&(registers.len() as u16).to_be_bytes());
        pdu.push((registers.len() * 2) as u8);
        for register in registers {
            pdu.extend_from_slice(&register.to_be_bytes());
        }
        Ok(pdu)
    }
}

fn modbus_error(message: &str) -> DriverError {
    DriverError::ExecutionFailed(format!("modbus: {}", message))
}

fn check_exception(pdu: &[u8], function_code: u8) -> Result<(), DriverError> {
    let Some(&code) = pdu.first() else {
        return Err(modbus_error("empty response"));
    };
    if code == function_code | 0x80 {
        let exception = pdu.get(1).copied().unwrap_or_default();
        return Err(modbus_error(&format!("exception code {:#04x}", exception)));
    }
    if code != function_code {
        return Err(modbus_error(&format!(
            "unexpected function code {:#04x}",
            code
        )));
    }
    Ok(())
}

/// 校验写响应（回显功能码即视为成功）
pub fn check_write_response(pdu: &[u8], request: &[u8]) -> Result<(), DriverError> {
    let function_code = request.first().copied().unwrap_or_default();
    check_exception(pdu, function_code)
}

/// CRC-16/MODBUS
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// RTU 帧：地址 + PDU + CRC（低字节在前）
pub fn build_rtu_frame(slave: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// 校验 RTU 帧并取出 PDU
pub fn parse_rtu_frame(slave: u8, frame: &[u8]) -> Result<&[u8], DriverError> {
    if frame.len() < 4 {
        return Err(modbus_error("rtu frame too short"));
    }
    let body_end = frame.len() - 2;
    let expected = crc16(&frame[..body_end]);
    let actual = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    if expected != actual {
        return Err(modbus_error(&format!(
            "crc mismatch: expected {:#06x}, got {:#06x}",
            expected, actual
        )));
    }
    if frame[0] != slave {
        return Err(modbus_error(&format!("unexpected slave {}", frame[0])));
    }
    Ok(&frame[1..body_end])
}

/// RTU 响应期望长度
pub fn rtu_response_len(pdu_len: usize) -> usize {
    pdu_len + 3
}

/// TCP 帧：MBAP 头 + PDU
pub fn build_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 7);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// 校验 MBAP 头并取出 PDU
pub fn parse_tcp_frame(transaction_id: u16, frame: &[u8]) -> Result<&[u8], DriverError> {
    if frame.len() < 9 {
        return Err(modbus_error("tcp frame too short"));
    }
    let tid = u16::from_be_bytes([frame[0], frame[1]]);
    if tid != transaction_id {
        return Err(modbus_error(&format!("transaction id mismatch: {}", tid)));
    }
    if frame[2] != 0 || frame[3] != 0 {
        return Err(modbus_error("invalid protocol id"));
    }
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    let end = 6 + length;
    if end > frame.len() || length < 2 {
        return Err(modbus_error("mbap length exceeds frame"));
    }
    Ok(&frame[7..end])
}

/// 解析寄存器数据为浮点值（大端寄存器序）
pub fn parse_registers(registers: &[u16], data_type: ModbusDataType) -> Result<f64, DriverError> {
    let need = data_type.register_count() as usize;
    if registers.len() < need {
        return Err(modbus_error(&format!(
            "need {} registers for {:?}, got {}",
            need,
            data_type,
            registers.len()
        )));
    }
    let value = match data_type {
        ModbusDataType::Int16 => registers[0] as i16 as f64,
        ModbusDataType::Uint16 => registers[0] as f64,
        ModbusDataType::Bool => (registers[0] != 0) as u8 as f64,
        ModbusDataType::Int32 => {
            let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
            bits as i32 as f64
        }
        ModbusDataType::Uint32 => (((registers[0] as u32) << 16) | registers[1] as u32) as f64,
        ModbusDataType::Float32 => {
            let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
            f32::from_bits(bits) as f64
        }
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, register| (acc << 16) | *register as u64);
            f64::from_bits(bits)
        }
    };
    Ok(value)
}

/// 把数值编码为寄存器（与 parse_registers 互逆）
pub fn encode_registers(value: f64, data_type: ModbusDataType) -> Vec<u16> {
    match data_type {
        ModbusDataType::Int16 => vec![(value.round() as i16) as u16],
        ModbusDataType::Uint16 => vec![value.round() as u16],
        ModbusDataType::Bool => vec![(value != 0.0) as u16],
        ModbusDataType::Int32 => split_u32(value.round() as i32 as u32),
        ModbusDataType::Uint32 => split_u32(value.round() as u32),
        ModbusDataType::Float32 => split_u32((value as f32).to_bits()),
        ModbusDataType::Float64 => {
            let bits = value.to_bits();
            (0..4)
                .map(|i| (bits >> (48 - i * 16)) as u16)
                .collect()
        }
    }
}

fn split_u32(bits: u32) -> Vec<u16> {
    vec![(bits >> 16) as u16, bits as u16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_known_frame() {
        // 01 03 00 00 00 0A -> CRC C5 CD
        let frame = build_rtu_frame(1, &[0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(&frame[6..], &[0xC5, 0xCD]);
    }

    #[test]
    fn rtu_builder_and_parser_agree() {
        let pdu = [0x03, 0x04, 0x00, 0x01, 0x00, 0x02];
        let frame = build_rtu_frame(7, &pdu);
        assert_eq!(parse_rtu_frame(7, &frame).expect("parse"), &pdu);
    }

    #[test]
    fn rtu_parser_rejects_bad_crc() {
        let mut frame = build_rtu_frame(1, &[0x03, 0x02, 0x00, 0x10]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(parse_rtu_frame(1, &frame).is_err());
    }

    #[test]
    fn tcp_frame_carries_length_and_unit() {
        let frame = build_tcp_frame(0x0102, 9, &[0x03, 0x00, 0x10, 0x00, 0x02]);
        assert_eq!(&frame[..7], &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x09]);
        let pdu = parse_tcp_frame(0x0102, &frame).expect("parse");
        assert_eq!(pdu, &[0x03, 0x00, 0x10, 0x00, 0x02]);
    }

    #[test]
    fn parse_registers_int16() {
        assert_eq!(parse_registers(&[100], ModbusDataType::Int16).expect("v"), 100.0);
        assert_eq!(
            parse_registers(&[(-100i16) as u16], ModbusDataType::Int16).expect("v"),
            -100.0
        );
    }

    #[test]
    fn parse_registers_float32() {
        let registers = encode_registers(25.5, ModbusDataType::Float32);
        assert_eq!(registers, vec![0x41CC, 0x0000]);
        assert_eq!(parse_registers(&registers, ModbusDataType::Float32).expect("v"), 25.5);
    }

    #[test]
    fn parse_registers_needs_enough_words() {
        assert!(parse_registers(&[1], ModbusDataType::Uint32).is_err());
    }

    #[test]
    fn point_decode_applies_scale() {
        let point = ModbusPoint {
            field_name: "voltage".to_string(),
            address: 0,
            count: 0,
            data_type: ModbusDataType::Uint16,
            function_code: 3,
            scale: Some(0.1),
            rw: "R".to_string(),
        };
        let value = point.decode(&[0x03, 0x02, 0x08, 0xFC]).expect("decode");
        assert!((value - 230.0).abs() < 1e-9);
    }

    #[test]
    fn exception_response_is_error() {
        let point: ModbusPoint =
            serde_json::from_str(r#"{"field_name":"t","address":1}"#).expect("point");
        assert!(point.decode(&[0x83, 0x02]).is_err());
    }

    #[test]
    fn write_pdu_picks_function_code() {
        let single: ModbusPoint =
            serde_json::from_str(r#"{"field_name":"sp","address":16}"#).expect("point");
        assert_eq!(
            single.write_pdu(12.0).expect("pdu"),
            vec![0x06, 0x00, 0x10, 0x00, 0x0C]
        );
        let wide: ModbusPoint = serde_json::from_str(
            r#"{"field_name":"sp","address":16,"data_type":"float32"}"#,
        )
        .expect("point");
        let pdu = wide.write_pdu(25.5).expect("pdu");
        assert_eq!(pdu[0], 0x10);
        assert_eq!(&pdu[3..6], &[0x00, 0x02, 0x04]);
    }
}
