//! Fingerprints of class files and method signatures

use crate::jvm::{FieldType, MethodDescriptor};

/// Identity of a class file across processes: `(raw_size << 32) | crc32`
///
/// This is the value the classlist `fingerprint:` option carries.
pub fn class_stream_fingerprint(bytes: &[u8]) -> u64 {
    ((bytes.len() as u64) << 32) | crc32fast::hash(bytes) as u64
}

/// Bits per parameter (and for the return type)
const PARAMETER_FEATURE_SIZE: u32 = 4;

/// Fingerprint of a signature that does not fit in 64 bits
pub const OVERFLOW_FINGERPRINT: u64 = u64::MAX;

/// Result type code for `void`
const VOID: u64 = 14;

/// Pack a method signature into 64 bits
///
/// Bit 0 is set for static methods, the next 4 bits hold the basic type of the result, and every
/// parameter then takes 4 more bits, left to right. Signatures that need more than 60 bits of
/// parameters get [`OVERFLOW_FINGERPRINT`], meaning "compare the signatures instead".
pub fn method_fingerprint<C>(descriptor: &MethodDescriptor<C>, is_static: bool) -> u64 {
    let max_parameters = ((64 - 1 - PARAMETER_FEATURE_SIZE) / PARAMETER_FEATURE_SIZE) as usize;
    if descriptor.parameters.len() > max_parameters {
        return OVERFLOW_FINGERPRINT;
    }

    let result = descriptor
        .return_type
        .as_ref()
        .map_or(VOID, |typ| typ.basic_type() as u64);
    let mut fingerprint = (is_static as u64) | (result << 1);
    let mut shift = 1 + PARAMETER_FEATURE_SIZE;
    for parameter in &descriptor.parameters {
        fingerprint |= (FieldType::basic_type(parameter) as u64) << shift;
        shift += PARAMETER_FEATURE_SIZE;
    }
    fingerprint
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{BinaryName, ParseDescriptor};

    fn fingerprint(descriptor: &str, is_static: bool) -> u64 {
        let descriptor = MethodDescriptor::<BinaryName>::parse(descriptor).unwrap();
        method_fingerprint(&descriptor, is_static)
    }

    #[test]
    fn packs_parameters_left_to_right() {
        assert_eq!(fingerprint("()V", false), 14 << 1);
        assert_eq!(fingerprint("()V", true), (14 << 1) | 1);
        assert_eq!(
            fingerprint("(IJ)Ljava/lang/Object;", true),
            1 | (12 << 1) | (10 << 5) | (11 << 9)
        );
        assert_eq!(fingerprint("([I)Z", false), (4 << 1) | (13 << 5));
        assert_ne!(fingerprint("(IJ)V", false), fingerprint("(JI)V", false));
    }

    #[test]
    fn long_signatures_overflow() {
        let fourteen = format!("({})V", "I".repeat(14));
        let fifteen = format!("({})V", "I".repeat(15));
        assert_ne!(fingerprint(&fourteen, false), OVERFLOW_FINGERPRINT);
        assert_eq!(fingerprint(&fifteen, false), OVERFLOW_FINGERPRINT);
    }

    #[test]
    fn stream_fingerprint() {
        let bytes = b"\xca\xfe\xba\xbe";
        assert_eq!(
            class_stream_fingerprint(bytes),
            (4 << 32) | crc32fast::hash(bytes) as u64
        );
    }
}
