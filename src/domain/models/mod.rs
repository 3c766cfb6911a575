mod api;
mod conversation;
mod event;
mod identity;
mod message;
mod stream_event;

pub use api::*;
pub use conversation::*;
pub use event::*;
pub use identity::*;
pub use message::*;
pub use stream_event::*;
