pub mod http_blast;
pub mod spread_burst;
pub mod ws_echo;
