//! Flow board console shared between firmware and emulator targets.
//!
//! Lines are lexed and parsed in [`grammar`] against the ordered table in
//! [`catalog`], then executed by [`CommandDispatcher`]. Every line gets
//! exactly one framing byte followed by the valve status report.

pub mod catalog;
mod dispatcher;
pub mod grammar;

pub use catalog::CommandTag;
pub use dispatcher::{
    CommandDispatcher, DispatchError, LINE_CAPACITY, LineBuffer, PAYLOAD_CAPACITY, Payload,
    REPLY_CAPACITY, Reply,
};
