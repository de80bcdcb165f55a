//! Tests for LogRecord encoding and decoding
//!
//! These tests verify:
//! - The exact on-disk layout of a record
//! - CRC32 corruption detection
//! - Edge cases (empty values, zeroed tails, torn buffers, bad sizes)
//! - Varint helpers and position encoding

use caskdb::data::{
    decode_log_record, decode_log_record_header, decode_uvarint, decode_varint, encode_uvarint,
    encode_varint, LogRecord, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
};
use caskdb::CaskError;

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_encode_normal_record_layout() {
    let record = LogRecord::normal(b"name".to_vec(), b"bitcask-kv".to_vec());
    let (buf, header_size) = record.encode();

    // crc(4) + type(1) + zigzag(4)=8 (1) + zigzag(10)=20 (1)
    assert_eq!(header_size, 7);
    assert_eq!(buf.len(), 7 + 4 + 10);
    assert_eq!(buf[4], LogRecordType::Normal as u8);
    assert_eq!(buf[5], 8);
    assert_eq!(buf[6], 20);
    assert_eq!(&buf[7..11], b"name");
    assert_eq!(&buf[11..], b"bitcask-kv");

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    assert_eq!(crc, crc32fast::hash(&buf[4..]));
}

#[test]
fn test_encode_tombstone_has_empty_value() {
    let record = LogRecord::tombstone(b"name".to_vec());
    let (buf, header_size) = record.encode();

    assert_eq!(buf[4], LogRecordType::Deleted as u8);
    assert_eq!(buf.len(), header_size + 4);

    let (decoded, size) = decode_log_record(&buf).unwrap();
    assert_eq!(decoded, record);
    assert_eq!(size, buf.len());
}

#[test]
fn test_header_grows_with_value_size() {
    let record = LogRecord::normal(b"k".to_vec(), vec![7u8; 300]);
    let (buf, header_size) = record.encode();

    // zigzag(300) = 600 needs two varint bytes
    assert_eq!(header_size, 8);
    assert!(header_size <= MAX_LOG_RECORD_HEADER_SIZE);
    assert_eq!(buf.len(), 8 + 1 + 300);
}

#[test]
fn test_decode_roundtrip_with_empty_value() {
    let record = LogRecord::normal(b"name".to_vec(), Vec::new());
    let (buf, _) = record.encode();

    let (decoded, size) = decode_log_record(&buf).unwrap();
    assert_eq!(decoded.key, b"name");
    assert!(decoded.value.is_empty());
    assert_eq!(decoded.rec_type, LogRecordType::Normal);
    assert_eq!(size, buf.len());
}

#[test]
fn test_decode_consumes_only_first_record() {
    let (mut buf, _) = LogRecord::normal(b"a".to_vec(), b"1".to_vec()).encode();
    let first_len = buf.len();
    let (second, _) = LogRecord::batch_finished(b"b".to_vec()).encode();
    buf.extend_from_slice(&second);

    let (decoded, size) = decode_log_record(&buf).unwrap();
    assert_eq!(decoded.key, b"a");
    assert_eq!(size, first_len);

    let (decoded, _) = decode_log_record(&buf[size..]).unwrap();
    assert_eq!(decoded.rec_type, LogRecordType::BatchFinished);
}

// =============================================================================
// Corruption Detection Tests
// =============================================================================

#[test]
fn test_flipped_value_byte_fails_crc() {
    let (mut buf, _) = LogRecord::normal(b"key".to_vec(), b"value".to_vec()).encode();
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;

    assert!(matches!(
        decode_log_record(&buf),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_flipped_type_byte_fails_crc() {
    let (mut buf, _) = LogRecord::normal(b"key".to_vec(), b"value".to_vec()).encode();
    buf[4] = LogRecordType::Deleted as u8;

    assert!(matches!(
        decode_log_record(&buf),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_flipped_crc_byte_is_detected() {
    let (mut buf, _) = LogRecord::normal(b"key".to_vec(), b"value".to_vec()).encode();
    buf[0] ^= 0x01;

    assert!(matches!(
        decode_log_record(&buf),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_every_flipped_bit_is_detected() {
    let (buf, _) = LogRecord::normal(b"key-abc".to_vec(), b"value-xyz".to_vec()).encode();

    // Covers the CRC, type, both size varints, key and value
    for byte in 0..buf.len() {
        for bit in 0..8 {
            let mut flipped = buf.clone();
            flipped[byte] ^= 1 << bit;
            assert!(
                matches!(decode_log_record(&flipped), Err(CaskError::CorruptRecord(_))),
                "byte {} bit {} not detected",
                byte,
                bit
            );
        }
    }
}

#[test]
fn test_torn_record_is_rejected() {
    let (buf, _) = LogRecord::normal(b"key".to_vec(), b"value".to_vec()).encode();

    assert!(matches!(
        decode_log_record(&buf[..buf.len() - 1]),
        Err(CaskError::CorruptRecord(_))
    ));
}

// =============================================================================
// Header Edge Cases
// =============================================================================

#[test]
fn test_empty_buffer_is_end_of_segment() {
    assert!(matches!(decode_log_record(&[]), Err(CaskError::EndOfSegment)));
    assert!(decode_log_record_header(&[1, 2, 3, 4]).unwrap().is_none());
}

#[test]
fn test_zeroed_tail_is_end_of_segment() {
    let zeros = [0u8; MAX_LOG_RECORD_HEADER_SIZE];
    assert!(decode_log_record_header(&zeros).unwrap().is_none());
    assert!(matches!(
        decode_log_record(&zeros),
        Err(CaskError::EndOfSegment)
    ));
}

#[test]
fn test_cut_varint_is_not_a_header() {
    // continuation bit set on the last available byte
    let buf = [9u8, 9, 9, 9, 0, 0x80];
    assert!(decode_log_record_header(&buf).unwrap().is_none());
}

#[test]
fn test_negative_size_is_corrupt() {
    // zigzag 1 decodes to -1
    let buf = [0u8, 0, 0, 0, 0, 1, 0];
    assert!(matches!(
        decode_log_record_header(&buf),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_header_fields() {
    let (buf, header_size) = LogRecord::normal(b"abc".to_vec(), b"defgh".to_vec()).encode();
    let (header, size) = decode_log_record_header(&buf).unwrap().unwrap();

    assert_eq!(size, header_size);
    assert_eq!(header.rec_type, 0);
    assert_eq!(header.key_size, 3);
    assert_eq!(header.value_size, 5);
}

// =============================================================================
// Position and Varint Tests
// =============================================================================

#[test]
fn test_position_encode_decode() {
    let pos = LogRecordPos::new(12, 1 << 33, 4096);
    let decoded = LogRecordPos::decode(&pos.encode()).unwrap();
    assert_eq!(decoded, pos);
}

#[test]
fn test_position_decode_rejects_garbage() {
    assert!(matches!(
        LogRecordPos::decode(&[0x80]),
        Err(CaskError::CorruptRecord(_))
    ));
    assert!(LogRecordPos::decode(&[1, 2]).is_err());
}

#[test]
fn test_zigzag_small_values() {
    let mut buf = Vec::new();
    encode_varint(&mut buf, 0);
    encode_varint(&mut buf, -1);
    encode_varint(&mut buf, 1);
    encode_varint(&mut buf, -2);
    assert_eq!(buf, vec![0, 1, 2, 3]);

    assert_eq!(decode_varint(&[3]), Some((-2, 1)));
}

#[test]
fn test_uvarint_multi_byte() {
    let mut buf = Vec::new();
    encode_uvarint(&mut buf, 300);
    assert_eq!(buf, vec![0xAC, 0x02]);
    assert_eq!(decode_uvarint(&buf), Some((300, 2)));

    let mut buf = Vec::new();
    encode_uvarint(&mut buf, u64::MAX);
    assert_eq!(buf.len(), 10);
    assert_eq!(decode_uvarint(&buf), Some((u64::MAX, 10)));
}

#[test]
fn test_uvarint_truncated_or_overlong() {
    assert_eq!(decode_uvarint(&[]), None);
    assert_eq!(decode_uvarint(&[0xFF, 0xFF]), None);
    assert_eq!(decode_uvarint(&[0xFF; 11]), None);
}
