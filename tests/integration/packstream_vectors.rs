//! Packstream encoding vectors, exercised through the public
//! `bolt_packstream` API rather than as an in-crate unit test, so a
//! regression that only shows up at the crate boundary (e.g. a type
//! that's `pub(crate)` instead of `pub`) would be caught here too.

use bolt_packstream::{pack, unpack, Value};
use bytes::{Bytes, BytesMut};

fn packed(v: &Value) -> BytesMut {
    let mut buf = BytesMut::new();
    pack(&mut buf, v).unwrap();
    buf
}

#[test]
fn tiny_positive_and_negative_integers() {
    assert_eq!(&packed(&Value::Integer(1))[..], &[0x01]);
    assert_eq!(&packed(&Value::Integer(-16))[..], &[0xF0]);
}

#[test]
fn int16_uses_smallest_fitting_encoding() {
    assert_eq!(&packed(&Value::Integer(200))[..], &[0xC9, 0x00, 0xC8]);
}

#[test]
fn strings() {
    assert_eq!(&packed(&Value::String(String::new()))[..], &[0x80]);
    assert_eq!(&packed(&Value::String("A".to_owned()))[..], &[0x81, 0x41]);
}

#[test]
fn tiny_list() {
    let list = Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    assert_eq!(&packed(&list)[..], &[0x93, 0x01, 0x02, 0x03]);
}

#[test]
fn nan_and_infinity_round_trip() {
    let mut nan_bytes = Bytes::from(packed(&Value::Float(f64::NAN)).freeze());
    match unpack(&mut nan_bytes).unwrap() {
        Value::Float(f) => assert!(f.is_nan()),
        other => panic!("expected float, got {other:?}"),
    }

    let mut inf_bytes = Bytes::from(packed(&Value::Float(f64::INFINITY)).freeze());
    match unpack(&mut inf_bytes).unwrap() {
        Value::Float(f) => assert_eq!(f, f64::INFINITY),
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn round_trip_holds_across_every_size_tier_and_value_kind() {
    let values = vec![
        Value::Null,
        Value::Boolean(true),
        Value::Boolean(false),
        Value::Integer(i64::MIN),
        Value::Integer(i64::MAX),
        Value::Float(-1.5),
        Value::String("x".repeat(70_000)),
        Value::Bytes(vec![0, 1, 2, 255]),
        Value::List((0..300).map(Value::Integer).collect()),
    ];
    for v in values {
        let mut bytes = Bytes::from(packed(&v).freeze());
        assert_eq!(unpack(&mut bytes).unwrap(), v);
    }
}
