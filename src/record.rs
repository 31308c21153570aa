//! Record Codec (§4.1): the wire format for a single append-unit, and its
//! encode/decode pair.
//!
//! Framing follows spec.md's field table exactly. Unlike the teacher's
//! `commit.rs`, which frames a *batch* of producer records under one CRC,
//! each `Record` here is self-delimited: its own magic, its own body CRC,
//! its own length. The Batch Encoder (`batch.rs`) is what plays the
//! teacher's "group several producer-visible units into one buffer" role,
//! by writing several of these self-framed records back to back.

use std::collections::BTreeMap;

use crate::error::EncodeError;

/// Marks a well-formed record.
pub const MESSAGE_MAGIC: u32 = 0xDAA320A7;
/// Marks a BLANK trailer: the remaining bytes of a segment, written so a
/// scan never has to special-case "ran off the end of the file" (§3 I4).
pub const BLANK_MAGIC: u32 = 0xCBD43194;

pub const PROP_TAGS: &str = "TAGS";
pub const PROP_KEYS: &str = "KEYS";
pub const PROP_UNIQ_KEY: &str = "UNIQ_KEY";
pub const PROP_DELAY: &str = "DELAY";
pub const PROP_REAL_TOPIC: &str = "REAL_TOPIC";
pub const PROP_REAL_QID: &str = "REAL_QID";

/// Reserved topic name scheduled (delayed) messages are rewritten onto
/// before append, per §4.1's tagsCode special case.
pub const SCHEDULE_TOPIC: &str = "SCHEDULE_TOPIC";

const PROP_SEPARATOR: char = '\u{1}';
const PROP_KV_SEPARATOR: char = '\u{2}';

bitflags::bitflags! {
    /// Transaction + addressing bits packed into the record's `sysFlag`
    /// field (§3, §4.1).
    #[derive(Default)]
    pub struct SysFlag: u32 {
        const COMPRESSED              = 0b0000_0001;
        const MULTI_TAGS               = 0b0000_0010;
        const TRANSACTION_PREPARED     = 0b0000_0100;
        const TRANSACTION_COMMIT       = 0b0000_1000;
        /// COMMIT | PREPARED: RocketMQ packs ROLLBACK as the union of the
        /// prepared and commit bits rather than a fourth distinct bit.
        const TRANSACTION_ROLLBACK     = 0b0000_1100;
        const BORNHOST_V6              = 0b0001_0000;
        const STOREHOST_V6             = 0b0010_0000;
    }
}

const TRANSACTION_MASK: u32 = SysFlag::TRANSACTION_PREPARED.bits() | SysFlag::TRANSACTION_COMMIT.bits();

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionType {
    Not,
    Prepared,
    Commit,
    Rollback,
}

impl SysFlag {
    pub fn transaction_type(&self) -> TransactionType {
        match self.bits() & TRANSACTION_MASK {
            0 => TransactionType::Not,
            b if b == SysFlag::TRANSACTION_PREPARED.bits() => TransactionType::Prepared,
            b if b == SysFlag::TRANSACTION_COMMIT.bits() => TransactionType::Commit,
            b if b == SysFlag::TRANSACTION_ROLLBACK.bits() => TransactionType::Rollback,
            _ => unreachable!("transaction mask has only 4 combinations"),
        }
    }

    pub fn set_transaction_type(&mut self, t: TransactionType) {
        self.remove(SysFlag::from_bits_truncate(TRANSACTION_MASK));
        let bits = match t {
            TransactionType::Not => 0,
            TransactionType::Prepared => SysFlag::TRANSACTION_PREPARED.bits(),
            TransactionType::Commit => SysFlag::TRANSACTION_COMMIT.bits(),
            TransactionType::Rollback => SysFlag::TRANSACTION_ROLLBACK.bits(),
        };
        self.insert(SysFlag::from_bits_truncate(bits));
    }
}

impl TransactionType {
    /// A prepared-but-unresolved or rolled-back message must never be
    /// dispatched to consumer queues (§3 I2, §4.5).
    pub fn is_prepared_or_rollback(self) -> bool {
        matches!(self, TransactionType::Prepared | TransactionType::Rollback)
    }
}

/// `bornHost` / `storeHost`: the typed replacement for reading a fixed
/// scratch region of bytes regardless of address family (§9, named source
/// bug: "silently consumed scratch bytes without checking the address
/// family bit first").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostAddr {
    V4 { ip: [u8; 4], port: u32 },
    V6 { ip: [u8; 16], port: u32 },
}

impl HostAddr {
    pub fn is_v6(&self) -> bool {
        matches!(self, HostAddr::V6 { .. })
    }

    /// Encoded length in bytes: 8 for v4 (4-byte address + 4-byte port), 20
    /// for v6 (16-byte address + 4-byte port) — the port-inclusive
    /// convention spec.md's table establishes for v4 is kept consistent for
    /// v6, rather than the bare 16-byte figure the table's shorthand might
    /// suggest; see DESIGN.md.
    pub fn encoded_len(&self) -> usize {
        match self {
            HostAddr::V4 { .. } => 8,
            HostAddr::V6 { .. } => 20,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            HostAddr::V4 { ip, port } => {
                out.extend_from_slice(ip);
                out.extend_from_slice(&port.to_be_bytes());
            }
            HostAddr::V6 { ip, port } => {
                out.extend_from_slice(ip);
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    fn decode(cur: &mut Cursor<'_>, is_v6: bool) -> Option<HostAddr> {
        if is_v6 {
            let ip: [u8; 16] = cur.take_array()?;
            let port = cur.take_u32()?;
            Some(HostAddr::V6 { ip, port })
        } else {
            let ip: [u8; 4] = cur.take_array()?;
            let port = cur.take_u32()?;
            Some(HostAddr::V4 { ip, port })
        }
    }
}

/// A fully decoded, self-framed record, owning its body/topic/properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub body_crc: u32,
    pub queue_id: i32,
    pub flag: i32,
    pub queue_offset: u64,
    pub physical_offset: u64,
    pub sys_flag: SysFlag,
    pub born_timestamp: i64,
    pub born_host: HostAddr,
    pub store_timestamp: i64,
    pub store_host: HostAddr,
    pub reconsume_times: u32,
    pub prepared_tx_offset: u64,
    pub body: Vec<u8>,
    pub topic: String,
    pub properties: String,
}

impl Record {
    /// Build a record ready for append, computing `body_crc` immediately so
    /// the CRC work happens on the caller's thread, before the put lock is
    /// acquired (§4.3 "CRC is computed before the lock").
    #[allow(clippy::too_many_arguments)]
    pub fn for_append(
        queue_id: i32,
        flag: i32,
        sys_flag: SysFlag,
        born_timestamp: i64,
        born_host: HostAddr,
        store_timestamp: i64,
        store_host: HostAddr,
        prepared_tx_offset: u64,
        body: Vec<u8>,
        topic: String,
        properties: String,
    ) -> Self {
        let body_crc = crc32c::crc32c(&body);
        Record {
            body_crc,
            queue_id,
            flag,
            queue_offset: 0,
            physical_offset: 0,
            sys_flag,
            born_timestamp,
            born_host,
            store_timestamp,
            store_host,
            reconsume_times: 0,
            prepared_tx_offset,
            body,
            topic,
            properties,
        }
    }

    pub fn properties_map(&self) -> BTreeMap<String, String> {
        parse_properties(&self.properties)
    }

    pub fn tags(&self) -> Option<String> {
        self.properties_map().remove(PROP_TAGS)
    }

    pub fn keys(&self) -> Option<String> {
        self.properties_map().remove(PROP_KEYS)
    }

    pub fn unique_key(&self) -> Option<String> {
        self.properties_map().remove(PROP_UNIQ_KEY)
    }
}

/// The delivery-time computation for `SCHEDULE_TOPIC` messages is owned by
/// an external collaborator (§6 "ScheduleService"); the Record Codec only
/// needs its contract to fold tagsCode correctly on decode.
pub trait DelayScheduler {
    fn max_delay_level(&self) -> u8;
    fn deliver_timestamp(&self, level: u8, store_timestamp: i64) -> i64;
}

/// Result of decoding one record out of a byte range (§4.1 decode protocol):
/// a record, an end-of-segment marker (BLANK), or a corrupt span to skip.
#[derive(Debug)]
pub enum DecodeOutcome {
    Record { record: Record, tags_code: i64, size: u32 },
    EndOfSegment { size: u32 },
    /// `size < 0` mirrors RocketMQ's convention of a negative decode result
    /// signalling "unreadable, do not retry at this offset".
    Corrupt,
}

pub fn calc_msg_length(sys_flag: SysFlag, body_len: usize, topic_len: usize, props_len: usize) -> u32 {
    let born_host_len = if sys_flag.contains(SysFlag::BORNHOST_V6) { 20 } else { 8 };
    let store_host_len = if sys_flag.contains(SysFlag::STOREHOST_V6) { 20 } else { 8 };
    (4   // total size
        + 4   // magic
        + 4   // body crc
        + 4   // queue id
        + 4   // flag
        + 8   // queue offset
        + 8   // physical offset
        + 4   // sys flag
        + 8   // born timestamp
        + born_host_len
        + 8   // store timestamp
        + store_host_len
        + 4   // reconsume times
        + 8   // prepared tx offset
        + 4 + body_len
        + 1 + topic_len
        + 2 + props_len) as u32
}

/// Encode `record` into `out`, appending the bytes (no allocation beyond
/// `out`'s own growth) and returning the total encoded size.
pub fn encode_into(
    record: &Record,
    max_message_size: u64,
    max_topic_len: usize,
    max_props_len: usize,
    out: &mut Vec<u8>,
) -> Result<u32, EncodeError> {
    let topic_bytes = record.topic.as_bytes();
    if topic_bytes.len() > max_topic_len {
        return Err(EncodeError::TopicSizeExceeded { len: topic_bytes.len() });
    }
    let props_bytes = record.properties.as_bytes();
    if props_bytes.len() > max_props_len {
        return Err(EncodeError::PropertiesSizeExceeded {
            len: props_bytes.len(),
            max: max_props_len,
        });
    }

    let total = calc_msg_length(record.sys_flag, record.body.len(), topic_bytes.len(), props_bytes.len());
    if total as u64 > max_message_size {
        return Err(EncodeError::MessageSizeExceeded {
            size: total as u64,
            max: max_message_size,
        });
    }

    out.reserve(total as usize);
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(&MESSAGE_MAGIC.to_be_bytes());
    out.extend_from_slice(&record.body_crc.to_be_bytes());
    out.extend_from_slice(&record.queue_id.to_be_bytes());
    out.extend_from_slice(&record.flag.to_be_bytes());
    out.extend_from_slice(&record.queue_offset.to_be_bytes());
    out.extend_from_slice(&record.physical_offset.to_be_bytes());
    out.extend_from_slice(&record.sys_flag.bits().to_be_bytes());
    out.extend_from_slice(&record.born_timestamp.to_be_bytes());
    record.born_host.encode(out);
    out.extend_from_slice(&record.store_timestamp.to_be_bytes());
    record.store_host.encode(out);
    out.extend_from_slice(&record.reconsume_times.to_be_bytes());
    out.extend_from_slice(&record.prepared_tx_offset.to_be_bytes());
    out.extend_from_slice(&(record.body.len() as u32).to_be_bytes());
    out.extend_from_slice(&record.body);
    out.push(topic_bytes.len() as u8);
    out.extend_from_slice(topic_bytes);
    out.extend_from_slice(&(props_bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(props_bytes);

    Ok(total)
}

/// Patch the `queueOffset`/`physicalOffset` placeholders the Batch Encoder
/// leaves at a fixed position within an already-encoded record (§4.2: "fixed
/// positions `msgPos+20`, `msgPos+28`").
pub fn patch_offsets(buf: &mut [u8], msg_pos: usize, queue_offset: u64, physical_offset: u64) {
    buf[msg_pos + 20..msg_pos + 28].copy_from_slice(&queue_offset.to_be_bytes());
    buf[msg_pos + 28..msg_pos + 36].copy_from_slice(&physical_offset.to_be_bytes());
}

/// `msgId = storeHost || physicalOffset` (§4.3 `doAppend`): a compact,
/// self-describing handle a producer can use to locate the record later
/// without a separate index lookup.
pub fn encode_msg_id(store_host: &HostAddr, physical_offset: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(store_host.encoded_len() + 8);
    store_host.encode(&mut out);
    out.extend_from_slice(&physical_offset.to_be_bytes());
    out
}

/// Write the 8-byte BLANK trailer header. The remaining `remaining - 8`
/// bytes are left as-is (the segment's pre-extended zero padding); a reader
/// skips `remaining` bytes total on seeing `BLANK_MAGIC` (§3 I4).
pub fn encode_blank(remaining: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&remaining.to_be_bytes());
    out[4..8].copy_from_slice(&BLANK_MAGIC.to_be_bytes());
    out
}

macro_rules! or_corrupt {
    ($opt:expr) => {
        match $opt {
            Some(v) => v,
            None => return DecodeOutcome::Corrupt,
        }
    };
}

pub fn decode<S: DelayScheduler + ?Sized>(bytes: &[u8], crc_check_enabled: bool, scheduler: &S) -> DecodeOutcome {
    let mut cur = Cursor::new(bytes);
    let total_size = match cur.take_u32() {
        Some(v) => v,
        None => return DecodeOutcome::Corrupt,
    };
    let magic = match cur.take_u32() {
        Some(v) => v,
        None => return DecodeOutcome::Corrupt,
    };
    if magic == BLANK_MAGIC {
        return DecodeOutcome::EndOfSegment { size: total_size };
    }
    if magic != MESSAGE_MAGIC {
        return DecodeOutcome::Corrupt;
    }

    let body_crc = or_corrupt!(cur.take_u32());
    let queue_id = or_corrupt!(cur.take_i32());
    let flag = or_corrupt!(cur.take_i32());
    let queue_offset = or_corrupt!(cur.take_u64());
    let physical_offset = or_corrupt!(cur.take_u64());
    let sys_flag_bits = or_corrupt!(cur.take_u32());
    let sys_flag = SysFlag::from_bits_truncate(sys_flag_bits);
    let born_timestamp = or_corrupt!(cur.take_i64());
    let born_host = or_corrupt!(HostAddr::decode(&mut cur, sys_flag.contains(SysFlag::BORNHOST_V6)));
    let store_timestamp = or_corrupt!(cur.take_i64());
    let store_host = or_corrupt!(HostAddr::decode(&mut cur, sys_flag.contains(SysFlag::STOREHOST_V6)));
    let reconsume_times = or_corrupt!(cur.take_u32());
    let prepared_tx_offset = or_corrupt!(cur.take_u64());

    let body_len = or_corrupt!(cur.take_u32()) as usize;
    let body = or_corrupt!(cur.take_slice(body_len)).to_vec();
    if crc_check_enabled && !body.is_empty() && crc32c::crc32c(&body) != body_crc {
        return DecodeOutcome::Corrupt;
    }

    let topic_len = or_corrupt!(cur.take_u8()) as usize;
    let topic_bytes = or_corrupt!(cur.take_slice(topic_len));
    let topic = match std::str::from_utf8(topic_bytes) {
        Ok(s) => s.to_string(),
        Err(_) => return DecodeOutcome::Corrupt,
    };

    let props_len = or_corrupt!(cur.take_u16()) as usize;
    let props_bytes = or_corrupt!(cur.take_slice(props_len));
    let properties = match std::str::from_utf8(props_bytes) {
        Ok(s) => s.to_string(),
        Err(_) => return DecodeOutcome::Corrupt,
    };

    let computed = calc_msg_length(sys_flag, body_len, topic_len, props_len);
    if computed != total_size {
        return DecodeOutcome::Corrupt;
    }

    let record = Record {
        body_crc,
        queue_id,
        flag,
        queue_offset,
        physical_offset,
        sys_flag,
        born_timestamp,
        born_host,
        store_timestamp,
        store_host,
        reconsume_times,
        prepared_tx_offset,
        body,
        topic,
        properties,
    };

    let tags_code = compute_tags_code(&record, scheduler);

    DecodeOutcome::Record {
        record,
        tags_code,
        size: total_size,
    }
}

/// Default tagsCode: for `SCHEDULE_TOPIC` messages it's the delivery
/// timestamp computed from the `DELAY` property via the delay scheduler
/// collaborator; otherwise it's a hash of the `TAGS` property (§4.1).
fn compute_tags_code<S: DelayScheduler + ?Sized>(record: &Record, scheduler: &S) -> i64 {
    let props = record.properties_map();
    if record.topic == SCHEDULE_TOPIC {
        if let Some(level) = props.get(PROP_DELAY).and_then(|s| s.parse::<u8>().ok()) {
            let level = level.min(scheduler.max_delay_level());
            return scheduler.deliver_timestamp(level, record.store_timestamp);
        }
    }
    props.get(PROP_TAGS).map(|t| hash_tags(t)).unwrap_or(0)
}

/// Java-`String.hashCode`-compatible 32-bit hash, sign-extended to 64 bits,
/// matching RocketMQ's default single-tag `tagsCode` derivation.
pub fn hash_tags(tags: &str) -> i64 {
    let mut h: i32 = 0;
    for c in tags.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    h as i64
}

pub fn encode_properties(map: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in map {
        if !out.is_empty() {
            out.push(PROP_SEPARATOR);
        }
        out.push_str(k);
        out.push(PROP_KV_SEPARATOR);
        out.push_str(v);
    }
    out
}

pub fn parse_properties(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if raw.is_empty() {
        return map;
    }
    for kv in raw.split(PROP_SEPARATOR) {
        if let Some((k, v)) = kv.split_once(PROP_KV_SEPARATOR) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

/// Bump-pointer reader over an in-memory record span. Not a general-purpose
/// `std::io::Read` impl: every accessor returns `None` on short input rather
/// than erroring, so callers can route truncated/corrupt spans through
/// `DecodeOutcome::Corrupt` uniformly.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take_slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let s = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(s)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let s = self.take_slice(N)?;
        s.try_into().ok()
    }

    fn take_u8(&mut self) -> Option<u8> {
        self.take_array::<1>().map(|a| a[0])
    }

    fn take_u16(&mut self) -> Option<u16> {
        self.take_array::<2>().map(u16::from_be_bytes)
    }

    fn take_u32(&mut self) -> Option<u32> {
        self.take_array::<4>().map(u32::from_be_bytes)
    }

    fn take_i32(&mut self) -> Option<i32> {
        self.take_array::<4>().map(i32::from_be_bytes)
    }

    fn take_u64(&mut self) -> Option<u64> {
        self.take_array::<8>().map(u64::from_be_bytes)
    }

    fn take_i64(&mut self) -> Option<i64> {
        self.take_array::<8>().map(i64::from_be_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSchedule;
    impl DelayScheduler for NoSchedule {
        fn max_delay_level(&self) -> u8 {
            18
        }
        fn deliver_timestamp(&self, _level: u8, _store_timestamp: i64) -> i64 {
            0
        }
    }

    fn sample_record() -> Record {
        let mut props = BTreeMap::new();
        props.insert(PROP_TAGS.to_string(), "order-events".to_string());
        props.insert(PROP_KEYS.to_string(), "k-1".to_string());
        Record::for_append(
            3,
            0,
            SysFlag::empty(),
            1_000,
            HostAddr::V4 { ip: [127, 0, 0, 1], port: 10911 },
            1_001,
            HostAddr::V4 { ip: [127, 0, 0, 1], port: 10912 },
            0,
            b"hello world".to_vec(),
            "TopicA".to_string(),
            encode_properties(&props),
        )
    }

    #[test]
    fn round_trip() {
        let rec = sample_record();
        let mut buf = Vec::new();
        let n = encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        assert_eq!(n as usize, buf.len());

        match decode(&buf, true, &NoSchedule) {
            DecodeOutcome::Record { record, tags_code, size } => {
                assert_eq!(size, n);
                assert_eq!(record.body, rec.body);
                assert_eq!(record.topic, rec.topic);
                assert_eq!(record.keys(), Some("k-1".to_string()));
                assert_eq!(tags_code, hash_tags("order-events"));
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn v6_hosts_round_trip() {
        let mut rec = sample_record();
        rec.sys_flag.insert(SysFlag::BORNHOST_V6 | SysFlag::STOREHOST_V6);
        rec.born_host = HostAddr::V6 { ip: [1; 16], port: 1 };
        rec.store_host = HostAddr::V6 { ip: [2; 16], port: 2 };

        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        match decode(&buf, true, &NoSchedule) {
            DecodeOutcome::Record { record, .. } => {
                assert_eq!(record.born_host, rec.born_host);
                assert_eq!(record.store_host, rec.store_host);
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_crc_detected() {
        let rec = sample_record();
        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        let body_crc_pos = 8;
        buf[body_crc_pos] ^= 0xFF;
        match decode(&buf, true, &NoSchedule) {
            DecodeOutcome::Corrupt => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn crc_check_disabled_accepts_mismatch() {
        let rec = sample_record();
        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        buf[8] ^= 0xFF;
        match decode(&buf, false, &NoSchedule) {
            DecodeOutcome::Record { .. } => {}
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn blank_trailer_decodes_as_end_of_segment() {
        let blank = encode_blank(128);
        match decode(&blank, true, &NoSchedule) {
            DecodeOutcome::EndOfSegment { size } => assert_eq!(size, 128),
            other => panic!("expected EndOfSegment, got {other:?}"),
        }
    }

    #[test]
    fn truncated_buffer_is_corrupt_not_panic() {
        let rec = sample_record();
        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        buf.truncate(buf.len() - 5);
        match decode(&buf, true, &NoSchedule) {
            DecodeOutcome::Corrupt => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn oversize_message_rejected() {
        let rec = sample_record();
        let mut buf = Vec::new();
        let err = encode_into(&rec, 8, 255, 32_767, &mut buf).unwrap_err();
        assert!(matches!(err, EncodeError::MessageSizeExceeded { .. }));
    }

    #[test]
    fn schedule_topic_tags_code_is_deliver_timestamp() {
        struct Fixed;
        impl DelayScheduler for Fixed {
            fn max_delay_level(&self) -> u8 {
                18
            }
            fn deliver_timestamp(&self, level: u8, store_timestamp: i64) -> i64 {
                store_timestamp + level as i64 * 1000
            }
        }
        let mut props = BTreeMap::new();
        props.insert(PROP_DELAY.to_string(), "3".to_string());
        let rec = Record::for_append(
            0,
            0,
            SysFlag::empty(),
            1,
            HostAddr::V4 { ip: [0; 4], port: 0 },
            5_000,
            HostAddr::V4 { ip: [0; 4], port: 0 },
            0,
            b"payload".to_vec(),
            SCHEDULE_TOPIC.to_string(),
            encode_properties(&props),
        );
        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        match decode(&buf, true, &Fixed) {
            DecodeOutcome::Record { tags_code, .. } => assert_eq!(tags_code, 5_000 + 3000),
            other => panic!("expected Record, got {other:?}"),
        }
    }

    #[test]
    fn patch_offsets_writes_at_fixed_positions() {
        let mut rec = sample_record();
        rec.queue_offset = 0;
        rec.physical_offset = 0;
        let mut buf = Vec::new();
        encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        patch_offsets(&mut buf, 0, 42, 4242);
        match decode(&buf, true, &NoSchedule) {
            DecodeOutcome::Record { record, .. } => {
                assert_eq!(record.queue_offset, 42);
                assert_eq!(record.physical_offset, 4242);
            }
            other => panic!("expected Record, got {other:?}"),
        }
    }
}
