//! The unpacker worker: decodes chunks between the two mailboxes.
//!
//! Takes a loaded chunk from the loader's outbox, parses its metadata and
//! unpacks its packets in place, and hands it to the consumer-facing
//! outbox. The empty end-of-data chunk passes through undecoded and ends
//! the loop; the first consumer to see it latches the reader at EOF.

use std::sync::Arc;

use crate::codec::unpack_chunk;
use crate::error::Result;

use super::pipeline::Exchange;

pub(crate) struct Unpacker {
    pub(crate) ex: Arc<Exchange>,
}

impl Unpacker {
    pub(crate) fn run(self) {
        if let Err(err) = self.drive() {
            self.ex.poison(err);
        }
    }

    fn drive(&self) -> Result<()> {
        loop {
            let mut chu = match self.ex.take_loaded() {
                Some(chu) => chu,
                None => return Ok(()),
            };

            let done = chu.n == 0;
            if !done {
                unpack_chunk(&mut chu)?;
            }
            if !self.ex.put_unpacked(chu) || done {
                return Ok(());
            }
        }
    }
}
