//! Session tunables.

use std::time::Duration;

/// Largest DATA payload a stream produces in one frame.
pub const DEFAULT_SENDING_CHUNK_SIZE: usize = 4096;

/// Receive window advertised to the server at session start (256 MiB).
pub const DEFAULT_INITIAL_WINDOW: u32 = 256 * 1024 * 1024;

/// Unacknowledged DATA bytes that trigger a WINDOW_UPDATE (64 KiB).
pub const DEFAULT_MINIMUM_TO_ACK: u64 = 64 * 1024;

/// Server send window assumed until its SETTINGS says otherwise (64 KiB).
pub const DEFAULT_SERVER_INITIAL_WINDOW: u32 = 64 * 1024;

/// Concurrent stream limit assumed until the server announces one.
pub const DEFAULT_MAX_CONCURRENT: u32 = 100;

/// Size of the frame-header buffer, also the coalescing threshold.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Initial capacity of the session output queue.
pub const DEFAULT_OUTPUT_QUEUE_SIZE: usize = 32 * 1024;

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub sending_chunk_size: usize,
    pub initial_window: u32,
    pub minimum_to_ack: u64,
    pub server_initial_window: u32,
    pub max_concurrent: u32,
    /// Idle time after which a keep-alive PING is sent. Zero disables pinging.
    pub ping_threshold: Duration,
    /// How long an outstanding PING may go unanswered before the session is closed.
    pub ping_timeout: Duration,
    /// Copy short body chunks behind their frame header so both leave in one write.
    pub coalesce_small_frames: bool,
    pub output_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sending_chunk_size: DEFAULT_SENDING_CHUNK_SIZE,
            initial_window: DEFAULT_INITIAL_WINDOW,
            minimum_to_ack: DEFAULT_MINIMUM_TO_ACK,
            server_initial_window: DEFAULT_SERVER_INITIAL_WINDOW,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            ping_threshold: Duration::from_secs(58),
            ping_timeout: Duration::from_secs(8),
            coalesce_small_frames: true,
            output_queue_size: DEFAULT_OUTPUT_QUEUE_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sending_chunk_size(mut self, size: usize) -> Self {
        self.sending_chunk_size = size.max(1);
        self
    }

    pub fn with_initial_window(mut self, window: u32) -> Self {
        self.initial_window = window & 0x7fff_ffff;
        self
    }

    pub fn with_minimum_to_ack(mut self, bytes: u64) -> Self {
        self.minimum_to_ack = bytes;
        self
    }

    pub fn with_server_initial_window(mut self, window: u32) -> Self {
        self.server_initial_window = window;
        self
    }

    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_ping_threshold(mut self, threshold: Duration) -> Self {
        self.ping_threshold = threshold;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_coalesce_small_frames(mut self, enabled: bool) -> Self {
        self.coalesce_small_frames = enabled;
        self
    }

    pub fn with_output_queue_size(mut self, size: usize) -> Self {
        self.output_queue_size = size;
        self
    }
}
