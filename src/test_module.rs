//! The `Test` experiment module, which drives the simulated bench: four
//! settings go out in one parameter frame, four signals come back.

use crate::experiment_module::{DecodedFrame, ExperimentModule, SettingValue, Settings};
use crate::frame_codec::{
    decode_fields, pack_fields, EncodeError, FieldKind, FieldValue, Frame, PayloadError,
};

/// Id of the outbound parameter frame.
pub const PARAMETER_ID: u8 = 12;
/// Id of the inbound telemetry frame.
pub const TELEMETRY_ID: u8 = 10;

const DATA_POINTS: [&str; 4] = ["Value1", "Value2", "Value3", "Value4"];

/// `u32` milliseconds followed by one `f64` per data point.
const TELEMETRY_LAYOUT: [FieldKind; 5] = [
    FieldKind::U32,
    FieldKind::F64,
    FieldKind::F64,
    FieldKind::F64,
    FieldKind::F64,
];

/// Module named `Test`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestModule;

impl ExperimentModule for TestModule {
    fn name(&self) -> &str {
        "Test"
    }

    fn data_points(&self) -> Vec<String> {
        DATA_POINTS.iter().map(|s| s.to_string()).collect()
    }

    fn frame_id(&self) -> u8 {
        TELEMETRY_ID
    }

    fn public_settings(&self) -> Settings {
        [
            ("Value1", SettingValue::Float(0.0)),
            ("Value2", SettingValue::Float(10.0)),
            ("Value3", SettingValue::Int(320)),
            ("Value4", SettingValue::Int(10)),
        ]
        .into_iter()
        .collect()
    }

    fn encode_parameters(&self, settings: &Settings) -> Result<Frame, EncodeError> {
        let settings = self.normalize_settings(settings);
        let value = |name: &str| settings.get(name).copied().unwrap_or(SettingValue::Int(0));

        let payload = pack_fields(&[
            (FieldKind::F64, FieldValue::Float(value("Value1").as_f64())),
            (FieldKind::F32, FieldValue::Float(value("Value2").as_f64())),
            (FieldKind::I16, FieldValue::Int(value("Value3").as_i64())),
            (
                FieldKind::I16,
                FieldValue::Int(value("Value4").as_i64().rem_euclid(256)),
            ),
        ]);
        Frame::new(PARAMETER_ID, payload)
    }

    fn decode_frame(&self, payload: &[u8]) -> Result<DecodedFrame, PayloadError> {
        let fields = decode_fields(&TELEMETRY_LAYOUT, payload)?;
        let (time, values) = match fields.split_first() {
            Some((time, values)) => (time.as_f64() / 1000.0, values),
            None => (0.0, &[][..]),
        };

        Ok(DecodedFrame {
            time,
            points: DATA_POINTS
                .iter()
                .zip(values)
                .map(|(name, v)| (name.to_string(), v.as_f64()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FieldKind::*;

    #[test]
    fn parameters_wrap_the_last_value() {
        let settings: Settings = [
            ("Value1", SettingValue::Float(1.5)),
            ("Value2", SettingValue::Float(2.25)),
            ("Value3", SettingValue::Int(3)),
            ("Value4", SettingValue::Int(260)),
        ]
        .into_iter()
        .collect();

        let frame = TestModule.encode_parameters(&settings).unwrap();
        assert_eq!(frame.id(), PARAMETER_ID);
        assert_eq!(frame.payload().len(), 16);

        let fields = decode_fields(&[F64, F32, I16, I16], frame.payload()).unwrap();
        assert_eq!(
            fields,
            vec![
                FieldValue::Float(1.5),
                FieldValue::Float(2.25),
                FieldValue::Int(3),
                FieldValue::Int(4),
            ]
        );
    }

    #[test]
    fn negative_last_value_wraps_into_byte_range() {
        let settings: Settings = [("Value4", SettingValue::Int(-1))].into_iter().collect();
        let frame = TestModule.encode_parameters(&settings).unwrap();
        let fields = decode_fields(&[F64, F32, I16, I16], frame.payload()).unwrap();
        assert_eq!(fields[3], FieldValue::Int(255));
        // the rest came from the defaults
        assert_eq!(fields[2], FieldValue::Int(320));
    }

    #[test]
    fn telemetry_is_decoded_in_seconds() {
        let payload = pack_fields(&[
            (U32, FieldValue::Int(2500)),
            (F64, FieldValue::Float(1.0)),
            (F64, FieldValue::Float(2.0)),
            (F64, FieldValue::Float(3.0)),
            (F64, FieldValue::Float(4.0)),
        ]);
        let decoded = TestModule.decode_frame(&payload).unwrap();
        assert_eq!(decoded.time, 2.5);
        assert_eq!(decoded.points.len(), 4);
        assert_eq!(decoded.points["Value3"], 3.0);
    }

    #[test]
    fn short_telemetry_is_an_error() {
        assert_eq!(
            TestModule.decode_frame(&[0; 20]),
            Err(PayloadError::Short {
                needed: 36,
                found: 20
            })
        );
    }
}
