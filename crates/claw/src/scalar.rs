use crate::FieldType;

mod sealed {
    pub trait Sealed {}
}

/// ScalarWire is the encoded shape of one scalar value.
#[doc(hidden)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScalarWire {
    /// The value occupies the 40-bit header payload; no trailing bytes.
    Inline(u64),
    /// The header payload is the trailer length (8); the value follows as
    /// 8 little-endian bytes.
    Trailer([u8; 8]),
}

/// Scalar is implemented by the eleven scalar atoms of the wire format.
///
/// It fixes each type's tag, zero value, and conversion to and from the
/// header payload or 8-byte trailer. The trait is sealed: the tag registry
/// is closed and generated code never adds scalar types.
pub trait Scalar: sealed::Sealed + Copy + PartialEq + std::fmt::Debug {
    const TAG: FieldType;
    const ZERO: Self;

    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    #[doc(hidden)]
    fn to_wire(self) -> ScalarWire;
    #[doc(hidden)]
    fn from_payload(payload: u64) -> Self;
    #[doc(hidden)]
    fn from_trailer(trailer: [u8; 8]) -> Self;
}

macro_rules! inline_scalar {
    ($t:ty, $tag:expr, $un:ty) => {
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            const TAG: FieldType = $tag;
            const ZERO: Self = 0 as $t;

            fn to_wire(self) -> ScalarWire {
                // Narrow types are stored as their unsigned bit patterns,
                // zero-extended into the 40-bit payload.
                ScalarWire::Inline(self as $un as u64)
            }
            fn from_payload(payload: u64) -> Self {
                payload as $un as $t
            }
            fn from_trailer(_: [u8; 8]) -> Self {
                unreachable!("{} is header-inline", stringify!($t))
            }
        }
    };
}

macro_rules! trailer_scalar {
    ($t:ty, $tag:expr) => {
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            const TAG: FieldType = $tag;
            const ZERO: Self = 0 as $t;

            fn to_wire(self) -> ScalarWire {
                ScalarWire::Trailer((self as u64).to_le_bytes())
            }
            fn from_payload(_: u64) -> Self {
                unreachable!("{} carries an 8-byte trailer", stringify!($t))
            }
            fn from_trailer(trailer: [u8; 8]) -> Self {
                u64::from_le_bytes(trailer) as $t
            }
        }
    };
}

inline_scalar!(u8, FieldType::Uint8, u8);
inline_scalar!(u16, FieldType::Uint16, u16);
inline_scalar!(u32, FieldType::Uint32, u32);
inline_scalar!(i8, FieldType::Int8, u8);
inline_scalar!(i16, FieldType::Int16, u16);
inline_scalar!(i32, FieldType::Int32, u32);

trailer_scalar!(u64, FieldType::Uint64);
trailer_scalar!(i64, FieldType::Int64);

impl sealed::Sealed for bool {}
impl Scalar for bool {
    const TAG: FieldType = FieldType::Bool;
    const ZERO: Self = false;

    fn to_wire(self) -> ScalarWire {
        // Bit 0 of the payload (bit 24 of the header) carries truth.
        ScalarWire::Inline(self as u64)
    }
    fn from_payload(payload: u64) -> Self {
        payload & 1 == 1
    }
    fn from_trailer(_: [u8; 8]) -> Self {
        unreachable!("bool is header-inline")
    }
}

impl sealed::Sealed for f32 {}
impl Scalar for f32 {
    const TAG: FieldType = FieldType::Float32;
    const ZERO: Self = 0.0;

    fn to_wire(self) -> ScalarWire {
        ScalarWire::Inline(self.to_bits() as u64)
    }
    fn from_payload(payload: u64) -> Self {
        f32::from_bits(payload as u32)
    }
    fn from_trailer(_: [u8; 8]) -> Self {
        unreachable!("f32 is header-inline")
    }
}

impl sealed::Sealed for f64 {}
impl Scalar for f64 {
    const TAG: FieldType = FieldType::Float64;
    const ZERO: Self = 0.0;

    fn to_wire(self) -> ScalarWire {
        ScalarWire::Trailer(self.to_bits().to_le_bytes())
    }
    fn from_payload(_: u64) -> Self {
        unreachable!("f64 carries an 8-byte trailer")
    }
    fn from_trailer(trailer: [u8; 8]) -> Self {
        f64::from_bits(u64::from_le_bytes(trailer))
    }
}

#[cfg(test)]
mod test {
    use super::{Scalar, ScalarWire};

    #[test]
    fn test_signed_inline_bit_patterns() {
        // Negative narrow integers are stored as their unsigned bit
        // patterns, not sign-extended through the 40-bit payload.
        assert_eq!((-1i8).to_wire(), ScalarWire::Inline(0xff));
        assert_eq!((-1i16).to_wire(), ScalarWire::Inline(0xffff));
        assert_eq!((-1i32).to_wire(), ScalarWire::Inline(0xffff_ffff));

        assert_eq!(i8::from_payload(0xff), -1);
        assert_eq!(i16::from_payload(0xffff), -1);
        assert_eq!(i32::from_payload(0xffff_ffff), -1);
        assert_eq!(i32::from_payload(0x7fff_ffff), i32::MAX);
    }

    #[test]
    fn test_trailer_round_trips() {
        for v in [0i64, 1, -1, i64::MIN, i64::MAX] {
            let ScalarWire::Trailer(t) = v.to_wire() else {
                panic!("i64 must use a trailer");
            };
            assert_eq!(i64::from_trailer(t), v);
        }
        let ScalarWire::Trailer(t) = f64::to_wire(-0.5) else {
            panic!("f64 must use a trailer");
        };
        assert_eq!(f64::from_trailer(t), -0.5);
    }

    #[test]
    fn test_float32_bits() {
        let ScalarWire::Inline(bits) = 1.5f32.to_wire() else {
            panic!("f32 must be inline");
        };
        assert_eq!(bits, 1.5f32.to_bits() as u64);
        assert_eq!(f32::from_payload(bits), 1.5);
    }

    #[test]
    fn test_zeroes() {
        assert!(0u32.is_zero());
        assert!(false.is_zero());
        assert!(0.0f64.is_zero());
        assert!((-0.0f64).is_zero()); // -0.0 == 0.0
        assert!(!f64::NAN.is_zero());
    }
}
