pub mod builder;
pub mod util;
pub mod workloads;

pub use builder::{BuilderInputError, EnvironmentBuilderExt};
pub use workloads::{
    http_blast::HttpBlastWorkload, spread_burst::SpreadBurstWorkload, ws_echo::WsEchoWorkload,
};
