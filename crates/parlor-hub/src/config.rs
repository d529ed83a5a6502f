use std::time::Duration;

/// Limits and deadlines applied to every session.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Frames buffered per connection before the router treats it as stalled.
    pub outbound_queue: usize,
    /// Deadline for writing one frame to the transport.
    pub write_timeout: Duration,
    /// Idle read deadline; any inbound frame resets it.
    pub read_timeout: Duration,
    /// Interval between transport pings.
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(90),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
