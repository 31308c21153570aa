//! Batch Encoder (§4.2): groups several producer-visible records sharing a
//! topic/queue into one contiguous buffer, ready for a single append under
//! the put lock.
//!
//! Each inner record is written in the same self-framed format as a single
//! append (`record::encode_into`), with `queueOffset`/`physicalOffset` left
//! as zero placeholders at the fixed offsets `msgPos+20`/`msgPos+28` that
//! `record::patch_offsets` fills in once the Append Engine knows the real
//! values. `storeTimestamp` is *not* a placeholder: it is stamped once, here,
//! before the lock is taken, so messages in the same batch share one
//! timestamp that may run slightly ahead of the put-lock acquisition time —
//! this is the accepted behavior of batched sends, not a bug to paper over.

use crate::error::EncodeError;
use crate::record::{self, HostAddr, Record, SysFlag};

/// A producer-submitted batch: one topic, one queue, several bodies.
pub struct MessageBatch {
    pub topic: String,
    pub queue_id: i32,
    pub flag: i32,
    pub sys_flag: SysFlag,
    pub born_timestamp: i64,
    pub born_host: HostAddr,
    pub store_timestamp: i64,
    pub store_host: HostAddr,
    pub properties: String,
    pub bodies: Vec<Vec<u8>>,
}

/// The encoded result: one contiguous buffer plus the byte offset of each
/// inner record within it, so the Append Engine can patch offsets in place.
pub struct EncodedBatch {
    pub buf: Vec<u8>,
    pub positions: Vec<usize>,
}

impl EncodedBatch {
    pub fn count(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Default)]
pub struct BatchEncoder {
    scratch: Vec<u8>,
}

impl BatchEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(
        &mut self,
        batch: &MessageBatch,
        max_message_size: u64,
        max_topic_len: usize,
        max_props_len: usize,
    ) -> Result<EncodedBatch, EncodeError> {
        self.scratch.clear();
        let mut positions = Vec::with_capacity(batch.bodies.len());

        for body in &batch.bodies {
            let pos = self.scratch.len();
            let rec = Record::for_append(
                batch.queue_id,
                batch.flag,
                batch.sys_flag,
                batch.born_timestamp,
                batch.born_host,
                batch.store_timestamp,
                batch.store_host,
                0,
                body.clone(),
                batch.topic.clone(),
                batch.properties.clone(),
            );
            record::encode_into(&rec, max_message_size, max_topic_len, max_props_len, &mut self.scratch)?;
            positions.push(pos);
        }

        if self.scratch.len() as u64 > max_message_size {
            return Err(EncodeError::MessageSizeExceeded {
                size: self.scratch.len() as u64,
                max: max_message_size,
            });
        }

        Ok(EncodedBatch {
            buf: std::mem::take(&mut self.scratch),
            positions,
        })
    }
}
