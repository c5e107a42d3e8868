// Digitizer record layout
pub const HEADER_WORDS: usize = 8;
pub const HEADER_BYTES: usize = HEADER_WORDS * std::mem::size_of::<u32>();
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

// Header word positions; the remaining words are reserved by the digitizer
pub const WORD_EVENT_SIZE: usize = 0;
pub const WORD_BOARD_ID: usize = 1;
pub const WORD_CHANNEL_ID: usize = 3;
pub const WORD_EVENT_COUNTER: usize = 4;

// ASCII record keys
pub const KEY_RECORD_LENGTH: &str = "Record Length";
pub const KEY_BOARD_ID: &str = "BoardID";
pub const KEY_CHANNEL: &str = "Channel";
pub const KEY_EVENT_NUMBER: &str = "Event Number";

/// Number of consistency warnings printed under `event_policy: warn` before suppression
pub const CONSISTENCY_WARN_LIMIT: usize = 20;

// Legacy "no crossing" values written at the persistence boundary
pub const CFD_TIME_SENTINEL: f32 = 0.0;
pub const CFD_JITTER_SENTINEL: f32 = 0.0;
pub const LE_TIME_SENTINEL: f32 = 20.0;
pub const LE_JITTER_SENTINEL: f32 = -5.0;
pub const LE_TOT_SENTINEL: f32 = -5.0;
pub const CHARGE_TIME_SENTINEL: f32 = 10.0;

/// Below this the two-point interpolation degenerates to the first point
pub const INTERPOLATION_EPSILON: f32 = 1.0e-9;

/// Sample period used when a waveform has a single sample (ns)
pub const DEFAULT_SAMPLE_PERIOD_NS: f32 = 0.2;

/// Leading-edge thresholds are configured in mV, amplitudes are in V
pub const MILLIVOLTS_PER_VOLT: f32 = 1000.0;
