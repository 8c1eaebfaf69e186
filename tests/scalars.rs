use futures_executor::block_on;
use proptest::prelude::*;

use wrapped_pack::encode::wrap_scalar;
use wrapped_pack::{Engine, Scalar, Timestamp, WrappedValue};

fn scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        any::<String>().prop_map(Scalar::String),
        any::<i32>().prop_map(Scalar::Int32),
        any::<i64>().prop_map(Scalar::Int64),
        any::<u32>().prop_map(Scalar::UInt32),
        any::<u64>().prop_map(Scalar::UInt64),
        any::<i32>().prop_map(Scalar::SInt32),
        any::<i64>().prop_map(Scalar::SInt64),
        any::<u32>().prop_map(Scalar::Fixed32),
        any::<u64>().prop_map(Scalar::Fixed64),
        any::<i32>().prop_map(Scalar::SFixed32),
        any::<i64>().prop_map(Scalar::SFixed64),
        any::<f64>().prop_map(Scalar::Double),
        any::<f32>().prop_map(Scalar::Float),
        any::<bool>().prop_map(Scalar::Bool),
        proptest::collection::vec(any::<u8>(), 0..64).prop_map(Scalar::Bytes),
        any::<char>().prop_map(Scalar::Char),
        any::<i16>().prop_map(Scalar::Short),
        any::<i8>().prop_map(Scalar::Byte),
        any::<i64>().prop_map(|ms| Scalar::DateMillis(Timestamp::from_millis(ms))),
        (any::<i64>(), 0..1_000_000_000i64)
            .prop_map(|(sec, nanos)| Scalar::Instant(Timestamp::from_utc(sec, nanos))),
        ("[a-z]{1,8}(\\.[A-Z][a-z]{0,8})?", any::<i32>())
            .prop_map(|(type_name, number)| Scalar::Enum { type_name, number }),
    ]
}

/// Floats compare by bit pattern so NaN payloads and signed zeros count.
fn same(a: &Scalar, b: &Scalar) -> bool {
    match (a, b) {
        (Scalar::Double(x), Scalar::Double(y)) => x.to_bits() == y.to_bits(),
        (Scalar::Float(x), Scalar::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

proptest! {
    #[test]
    fn scalars_round_trip(original in scalar()) {
        let engine = Engine::default();
        let bytes = wrap_scalar(&original);
        match block_on(engine.decode(&bytes)) {
            Ok(WrappedValue::Scalar(decoded)) => {
                prop_assert!(same(&original, &decoded), "{:?} != {:?}", original, decoded);
                prop_assert_eq!(decoded.kind(), original.kind());
            }
            other => prop_assert!(false, "{:?} decoded as {:?}", original, other),
        }
    }

    #[test]
    fn format_is_stable(original in scalar()) {
        let engine = Engine::default();
        let value = block_on(engine.decode(&wrap_scalar(&original))).unwrap();
        prop_assert_eq!(engine.format(&value), engine.format(&value));
        prop_assert_eq!(engine.format(&value), original.to_string());
    }
}
