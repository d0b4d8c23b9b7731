use crate::types::{KernelVersion, Result};

use super::{codec::deserialize_command, Command};

/// Decodes commands written at one kernel version.
pub trait CommandReader: Send + Sync {
    /// Version this reader understands.
    fn kernel_version(&self) -> KernelVersion;

    /// Decodes one serialised command.
    fn read(&self, bytes: &[u8]) -> Result<Command>;
}

struct VersionedReader(KernelVersion);

impl CommandReader for VersionedReader {
    fn kernel_version(&self) -> KernelVersion {
        self.0
    }

    fn read(&self, bytes: &[u8]) -> Result<Command> {
        deserialize_command(bytes, self.0)
    }
}

static V1_READER: VersionedReader = VersionedReader(KernelVersion::V1);
static V2_READER: VersionedReader = VersionedReader(KernelVersion::V2);
static V3_READER: VersionedReader = VersionedReader(KernelVersion::V3);

/// Picks the reader for the version byte a transaction was logged with.
#[derive(Copy, Clone, Debug, Default)]
pub struct CommandReaderFactory;

impl CommandReaderFactory {
    /// Reader for a persisted version byte.
    pub fn reader(&self, version: u8) -> Result<&'static dyn CommandReader> {
        Ok(self.reader_for(KernelVersion::from_version(version)?))
    }

    /// Reader for a known version.
    pub fn reader_for(&self, version: KernelVersion) -> &'static dyn CommandReader {
        match version {
            KernelVersion::V1 => &V1_READER,
            KernelVersion::V2 => &V2_READER,
            KernelVersion::V3 => &V3_READER,
        }
    }

    /// Decodes every command of a logged transaction.
    pub fn read_all(&self, version: KernelVersion, commands: &[Vec<u8>]) -> Result<Vec<Command>> {
        let reader = self.reader_for(version);
        commands.iter().map(|bytes| reader.read(bytes)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::serialize_command;
    use crate::types::PenumbraError;

    #[test]
    fn unknown_version_byte_is_rejected() {
        let factory = CommandReaderFactory;
        assert!(matches!(
            factory.reader(0),
            Err(PenumbraError::UnsupportedKernelVersion(0))
        ));
        for version in KernelVersion::ALL {
            assert_eq!(factory.reader(version.version()).unwrap().kernel_version(), version);
        }
    }

    #[test]
    fn reads_with_the_matching_format() -> Result<()> {
        let command = Command::RelationshipCount {
            rel_type: None,
            delta: 1,
        };
        let factory = CommandReaderFactory;
        let bytes = serialize_command(&command, KernelVersion::V1)?;
        assert_eq!(factory.reader(1)?.read(&bytes)?, command);
        Ok(())
    }
}
