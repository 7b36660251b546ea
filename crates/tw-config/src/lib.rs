pub mod bandwidth;
pub mod daemon;
pub mod disk;
pub mod notify;
pub mod paths;

pub use bandwidth::{parse_quota, BandwidthConfig, QuotaSize};
pub use daemon::{WatchdogConfig, DEFAULT_CONFIG_TOML};
pub use disk::DiskSmartConfig;
pub use notify::{ChannelConfig, DingTalkConfig, DispatchConfig, EmailConfig, WeComConfig};
pub use paths::ConfigPaths;
