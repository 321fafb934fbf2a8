use crate::core::{Result, StoreError};
use crate::snowflake::Id;

/// Bit layout of snowflake identifiers, fixed per deployment.
///
/// Most- to least-significant: `[ timestamp-since-epoch | machine-id |
/// sequence ]`, 63 bits total. The defaults give 41 bits of timestamp
/// (~69 years from the epoch), 10 bits of machine id and 12 bits of
/// sequence (4096 ids per millisecond per machine).
#[derive(Debug, Clone)]
pub struct SnowflakeLayout {
    /// Custom epoch, milliseconds since the Unix epoch.
    pub epoch_ms: i64,
    /// Left shift applied to the timestamp component.
    pub timestamp_shift: u32,
    /// Machine id baked into every generated identifier.
    pub machine_id: i64,
    /// Left shift applied to the machine id component.
    pub machine_id_shift: u32,
    /// Mask selecting the (shifted) machine id bits.
    pub machine_id_mask: i64,
    /// Mask selecting the sequence bits.
    pub sequence_mask: i64,
}

/// 2017-01-01T00:00:00Z.
pub const DEFAULT_EPOCH_MS: i64 = 1_483_228_800_000;

impl Default for SnowflakeLayout {
    fn default() -> Self {
        Self {
            epoch_ms: DEFAULT_EPOCH_MS,
            timestamp_shift: 22,
            machine_id: 0,
            machine_id_shift: 12,
            machine_id_mask: 0x3FF << 12,
            sequence_mask: 0xFFF,
        }
    }
}

impl SnowflakeLayout {
    pub fn with_machine_id(machine_id: i64) -> Self {
        Self {
            machine_id,
            ..Self::default()
        }
    }

    /// Validate the layout at process start.
    ///
    /// Exhausting the timestamp field width is the sole condition that
    /// stops the process here instead of being handled per call.
    pub fn validate(&self) -> Result<()> {
        if self.timestamp_shift >= 63 {
            return Err(StoreError::Config(
                "timestamp shift leaves no room for the timestamp".into(),
            ));
        }
        if self.machine_id_shift > self.timestamp_shift {
            return Err(StoreError::Config(
                "machine id field overlaps the timestamp field".into(),
            ));
        }
        if self.machine_id_mask & self.sequence_mask != 0 {
            return Err(StoreError::Config(
                "machine id mask and sequence mask overlap".into(),
            ));
        }
        let machine_capacity = self.machine_id_mask >> self.machine_id_shift;
        if self.machine_id < 0 || self.machine_id > machine_capacity {
            return Err(StoreError::Config(format!(
                "machine id {} does not fit in the configured field (max {})",
                self.machine_id, machine_capacity
            )));
        }

        // Identifier space exhaustion check: the current timestamp must
        // still fit in the timestamp field.
        let timestamp_capacity = (1i64 << (63 - self.timestamp_shift)) - 1;
        let now = chrono::Utc::now().timestamp_millis();
        if now - self.epoch_ms > timestamp_capacity {
            return Err(StoreError::Config(
                "identifier timestamp space is exhausted for this epoch".into(),
            ));
        }
        if now < self.epoch_ms {
            return Err(StoreError::Config("epoch lies in the future".into()));
        }
        Ok(())
    }

    /// Compose an identifier from its three components.
    pub fn compose(&self, timestamp_ms: i64, machine_id: i64, sequence: i64) -> Id {
        Id::new(
            ((timestamp_ms - self.epoch_ms) << self.timestamp_shift)
                | (machine_id << self.machine_id_shift)
                | sequence,
        )
    }

    /// Timestamp component, milliseconds since the configured epoch.
    pub fn timestamp_of(&self, id: Id) -> i64 {
        id.as_i64() >> self.timestamp_shift
    }

    /// Timestamp component, milliseconds since the Unix epoch.
    pub fn real_timestamp_of(&self, id: Id) -> i64 {
        self.timestamp_of(id) + self.epoch_ms
    }

    /// Machine id component.
    pub fn machine_id_of(&self, id: Id) -> i64 {
        (id.as_i64() & self.machine_id_mask) >> self.machine_id_shift
    }

    /// Sequence number component.
    pub fn sequence_of(&self, id: Id) -> i64 {
        id.as_i64() & self.sequence_mask
    }

    /// Smallest possible identifier for a real (Unix-epoch) timestamp
    /// and machine id. Useful as the lower bound of time-range scans.
    pub fn first_id_for_timestamp(&self, timestamp_ms: i64, machine_id: i64) -> Id {
        self.compose(timestamp_ms, machine_id, 0)
    }
}
