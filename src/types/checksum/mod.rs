#![forbid(unsafe_code)]

/// Running CRC over one logged transaction: its start entry payload
/// followed by every command payload, in log order.
///
/// The start payload carries the previous transaction's checksum, which
/// chains consecutive transactions together.
pub struct TransactionChecksum {
    inner: crc32fast::Hasher,
}

impl TransactionChecksum {
    /// Starts a checksum over the start entry.
    pub fn begin(start_payload: &[u8]) -> Self {
        let mut inner = crc32fast::Hasher::new();
        inner.update(start_payload);
        Self { inner }
    }

    /// Adds one encoded command.
    pub fn command(&mut self, payload: &[u8]) {
        self.inner.update(payload);
    }

    /// The value written into the commit entry.
    pub fn finish(self) -> u32 {
        self.inner.finalize()
    }
}

/// CRC over a log entry's kind byte, its length prefix and its payload.
pub fn entry_crc32(kind: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_checksum_depends_on_order() {
        let mut a = TransactionChecksum::begin(b"start");
        a.command(b"one");
        a.command(b"two");
        let mut b = TransactionChecksum::begin(b"start");
        b.command(b"two");
        b.command(b"one");
        assert_ne!(a.finish(), b.finish());

        let mut split = TransactionChecksum::begin(b"st");
        split.command(b"art");
        assert_eq!(split.finish(), TransactionChecksum::begin(b"start").finish());
    }

    #[test]
    fn entry_crc_covers_kind_and_payload() {
        let payload = vec![0u8; 16];
        let a = entry_crc32(1, &payload);
        assert_eq!(a, entry_crc32(1, &payload));
        assert_ne!(a, entry_crc32(2, &payload));
        let mut different = payload.clone();
        different[3] = 9;
        assert_ne!(a, entry_crc32(1, &different));
        assert_ne!(a, entry_crc32(1, &payload[..15]));
    }
}
