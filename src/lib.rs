//! btnmap - mouse button remapping
//!
//! Raw evdev records are decoded into rawcodes, matched against the rules of
//! the active configuration and turned into synthetic key and wheel events,
//! external commands or configuration switches.

pub mod config;
pub mod daemon;
pub mod decode;
pub mod dispatch;
pub mod event;
pub mod keynames;
pub mod mux;
pub mod output;
pub mod pidfile;
pub mod side_effect;
