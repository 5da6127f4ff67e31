// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use bytes::BytesMut;
use proptest::prelude::*;

use super::*;
use crate::state::{DeviceState, PrintResult, SensorValue};

fn encoded(msg: &DeviceStateMsg) -> Vec<u8> {
    let mut out = BytesMut::new();
    msg.encode(&mut out);
    out.to_vec()
}

#[test]
fn device_state_ok_is_two_bytes() {
    let bytes = encoded(&DeviceStateMsg::new(DeviceState::Ok));
    assert_eq!(bytes, vec![0x01, 0x02]);
    let decoded = DeviceStateMsg::decode(&bytes);
    assert_eq!(decoded, Ok((DeviceStateMsg::new(DeviceState::Ok), 2)));
}

#[test]
fn device_state_rejects_unknown_ordinal() {
    assert!(matches!(
        DeviceStateMsg::decode(&[0x01, 0xff]),
        Err(WireError::Malformed { kind: "invalid device state", position: 1 })
    ));
}

#[test]
fn device_state_rejects_trailing_bytes() {
    assert!(matches!(
        DeviceStateMsg::decode(&[0x01, 0x02, 0x00]),
        Err(WireError::Malformed { kind: "trailing bytes", .. })
    ));
}

#[test]
fn print_progress_fixed_layout() {
    let mut out = BytesMut::new();
    PrintProgressMsg::new(13, 37).encode(&mut out);
    assert_eq!(out.to_vec(), vec![0x04, 0x0d, 0x25, 0x00, 0x00, 0x00]);

    assert_eq!(PrintProgressMsg::decode(&out), Ok((PrintProgressMsg::new(13, 37), 6)));
}

#[test]
fn print_progress_rejects_percentage_above_100() {
    let mut bytes = vec![0x04, 0x0d, 0x25, 0x00, 0x00, 0x00];
    bytes[1] = 0xff;
    assert!(matches!(
        PrintProgressMsg::decode(&bytes),
        Err(WireError::Malformed { kind: "percentage above 100", position: 1 })
    ));
}

#[test]
fn print_round_trip_consumes_everything() {
    let msg = PrintMsg::new("G28\nG1 X10 Y10\n");
    let mut out = BytesMut::new();
    msg.encode(&mut out);
    assert_eq!(out.len(), 1 + 16 + 8 + msg.gcode.len());
    let decoded = PrintMsg::decode(&out);
    assert_eq!(decoded, Ok((msg, out.len())));
}

#[test]
fn print_rejects_length_mismatch() {
    let msg = PrintMsg::new("G28\n");
    let mut out = BytesMut::new();
    msg.encode(&mut out);
    let mut short = out.to_vec();
    short.pop();
    assert!(matches!(
        PrintMsg::decode(&short),
        Err(WireError::Malformed { kind: "gcode length mismatch", .. })
    ));
}

#[test]
fn request_code_halves_are_distinct() {
    let code = RequestCode::from_parts(0x1111_2222_3333_4444, 0x5555_6666_7777_8888);
    assert_eq!(code.part1(), 0x1111_2222_3333_4444);
    assert_eq!(code.part2(), 0x5555_6666_7777_8888);

    let msg = PrintResponseMsg::new(code, PrintResult::Ok);
    let mut out = BytesMut::new();
    msg.encode(&mut out);
    // tag, part1 LE, part2 LE, result
    assert_eq!(out[1..9], 0x1111_2222_3333_4444u64.to_le_bytes());
    assert_eq!(out[9..17], 0x5555_6666_7777_8888u64.to_le_bytes());
    assert_eq!(out[17], PrintResult::Ok.as_u8());
}

#[test]
fn print_response_rejects_invalid_result() {
    let mut out = BytesMut::new();
    PrintResponseMsg::new(RequestCode::generate(), PrintResult::Ok).encode(&mut out);
    let mut bytes = out.to_vec();
    bytes[17] = PrintResult::COUNT;
    assert!(matches!(
        PrintResponseMsg::decode(&bytes),
        Err(WireError::Malformed { kind: "invalid print result", .. })
    ));
}

#[test]
fn aliases_round_trip() {
    let mut aliases = BTreeMap::new();
    aliases.insert("prusa-123".to_owned(), "left".to_owned());
    aliases.insert("prusa-456".to_owned(), "right".to_owned());
    let msg = AliasesMsg { provider_alias: "workshop".to_owned(), aliases };

    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert_eq!(AliasesMsg::decode(&out), Ok((msg, out.len())));
}

#[test]
fn aliases_empty_provider_round_trip() {
    let msg = AliasesMsg::default();
    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert_eq!(out.to_vec(), vec![0x05, 0x00]);
    assert_eq!(AliasesMsg::decode(&out), Ok((msg, 2)));
}

#[test]
fn aliases_encode_rejects_long_string() {
    let msg = AliasesMsg { provider_alias: "x".repeat(256), aliases: BTreeMap::new() };
    let mut out = BytesMut::new();
    assert_eq!(
        msg.encode(&mut out),
        Err(WireError::Oversize { field: "provider alias", len: 256 })
    );
}

#[test]
fn aliases_set_round_trip() {
    let msg = AliasesSetMsg::new("prusa-123", "left");
    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert_eq!(AliasesSetMsg::decode(&out), Ok((msg, out.len())));
}

#[test]
fn aliases_set_provider_round_trip() {
    let msg = AliasesSetProviderMsg::new("workshop");
    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert_eq!(AliasesSetProviderMsg::decode(&out), Ok((msg, out.len())));
}

#[test]
fn alias_set_and_provider_tags_do_not_cross_decode() {
    let mut out = BytesMut::new();
    assert_eq!(AliasesSetMsg::new("d", "a").encode(&mut out), Ok(()));
    assert!(matches!(
        AliasesSetProviderMsg::decode(&out),
        Err(WireError::Malformed { kind: "unexpected message type", position: 0 })
    ));
}

#[test]
fn sensor_readings_round_trip() {
    let mut readings = BTreeMap::new();
    readings.insert("temp_bed".to_owned(), SensorValue::new(60.5).with_set_point(60.0).with_unit("C"));
    readings.insert("rpm_E0".to_owned(), SensorValue::new(0.0).with_unit("RPM"));
    readings.insert("pos_X".to_owned(), SensorValue::new(12.25));
    let msg = SensorReadingsMsg::new(readings);

    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert_eq!(SensorReadingsMsg::decode(&out), Ok((msg, out.len())));
}

#[test]
fn sensor_readings_rejects_unprintable_name() {
    let mut readings = BTreeMap::new();
    readings.insert("temp\u{7}bed".to_owned(), SensorValue::new(1.0));
    let msg = SensorReadingsMsg::new(readings);
    let mut out = BytesMut::new();
    assert_eq!(msg.encode(&mut out), Ok(()));
    assert!(matches!(
        SensorReadingsMsg::decode(&out),
        Err(WireError::Malformed { kind: "unprintable sensor name", .. })
    ));
}

#[test]
fn decoders_reject_unknown_tag() {
    assert!(matches!(
        DeviceStateMsg::decode(&[0x2a, 0x00]),
        Err(WireError::Malformed { kind: "unknown message type", position: 0 })
    ));
    assert!(matches!(
        PrintMsg::decode(&[0x00]),
        Err(WireError::Malformed { kind: "unknown message type", position: 0 })
    ));
}

#[test]
fn decoders_reject_empty_payload() {
    for decode in [
        |b: &[u8]| DeviceStateMsg::decode(b).map(|_| ()),
        |b: &[u8]| PrintProgressMsg::decode(b).map(|_| ()),
        |b: &[u8]| AliasesMsg::decode(b).map(|_| ()),
        |b: &[u8]| SensorReadingsMsg::decode(b).map(|_| ()),
    ] {
        assert!(matches!(decode(&[]), Err(WireError::Malformed { .. })));
    }
}

// -- property coverage for the variable-length messages ----------------------

fn printable_string(max: usize) -> impl Strategy<Value = String> {
    proptest::collection::vec(0x20u8..=0x7e, 0..max)
        .prop_map(|bytes| bytes.into_iter().map(char::from).collect())
}

proptest! {
    #[test]
    fn print_round_trips(gcode in "[ -~\n]{0,512}") {
        let msg = PrintMsg::new(gcode);
        let mut out = BytesMut::new();
        msg.encode(&mut out);
        prop_assert_eq!(PrintMsg::decode(&out), Ok((msg, out.len())));
    }

    #[test]
    fn aliases_round_trips(
        provider in printable_string(32),
        entries in proptest::collection::btree_map(printable_string(24), printable_string(24), 0..8),
    ) {
        let msg = AliasesMsg { provider_alias: provider, aliases: entries };
        let mut out = BytesMut::new();
        prop_assert_eq!(msg.encode(&mut out), Ok(()));
        prop_assert_eq!(AliasesMsg::decode(&out), Ok((msg, out.len())));
    }

    #[test]
    fn sensor_readings_round_trips(
        entries in proptest::collection::btree_map(
            printable_string(24).prop_filter("non-empty", |s| !s.is_empty()),
            (
                proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
                proptest::option::of(proptest::num::f64::NORMAL),
                proptest::option::of(printable_string(8).prop_filter("non-empty", |s| !s.is_empty())),
            ),
            0..8,
        ),
    ) {
        let readings: BTreeMap<String, SensorValue> = entries
            .into_iter()
            .map(|(name, (current, set_point, unit))| {
                (name, SensorValue { current, set_point, unit })
            })
            .collect();
        let msg = SensorReadingsMsg::new(readings);
        let mut out = BytesMut::new();
        prop_assert_eq!(msg.encode(&mut out), Ok(()));
        prop_assert_eq!(SensorReadingsMsg::decode(&out), Ok((msg, out.len())));
    }

    #[test]
    fn device_state_decode_never_reads_past_slice(bytes in proptest::collection::vec(any::<u8>(), 0..8)) {
        match DeviceStateMsg::decode(&bytes) {
            Ok((_, consumed)) => prop_assert!(consumed <= bytes.len()),
            Err(WireError::Malformed { position, .. }) => prop_assert!(position <= bytes.len()),
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn sensor_readings_decode_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        match SensorReadingsMsg::decode(&bytes) {
            Ok((_, consumed)) => prop_assert!(consumed <= bytes.len()),
            Err(WireError::Malformed { position, .. }) => prop_assert!(position <= bytes.len()),
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }
}
