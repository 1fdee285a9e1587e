use crate::domain::calendar::BusinessClock;

/// Advisory lock key serializing default sweeps.
pub const DEFAULT_PROCESSING_LOCK_KEY: i64 = 0x4445_4641_554c_5401;
/// Advisory lock key serializing the deferred notification pass.
pub const DEFAULT_NOTIFICATION_LOCK_KEY: i64 = 0x4445_4641_554c_5402;

/// Days into the remedy period on which a reminder goes out.
pub const REMINDER_DAYS: [u32; 2] = [7, 12];
/// Maximum number of default notices sent for a single remedy period.
pub const MAX_DEFAULT_NOTICES: u32 = 3;

/// Static configuration handed to the processor at construction.
///
/// Runtime thresholds (risk and remedy days, channel toggles) are not part of
/// this; they are read from the settings store on every run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub lock_key: i64,
    pub notification_lock_key: i64,
    pub reminder_days: Vec<u32>,
    pub max_notices: u32,
    pub business_clock: BusinessClock,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_PROCESSING_LOCK_KEY,
            notification_lock_key: DEFAULT_NOTIFICATION_LOCK_KEY,
            reminder_days: REMINDER_DAYS.to_vec(),
            max_notices: MAX_DEFAULT_NOTICES,
            business_clock: BusinessClock::malaysia(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_business_clock(mut self, clock: BusinessClock) -> Self {
        self.business_clock = clock;
        self
    }
}
