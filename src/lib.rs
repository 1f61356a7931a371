pub mod config;
pub mod copy;
pub mod diagnostics;
pub mod highlight;
pub mod html;
pub mod markdown;
pub mod message;
pub mod render;
pub mod reply;
pub mod sanitize;
pub mod scroll;
pub mod session;
pub mod sources;
pub mod status;
pub mod transport;
