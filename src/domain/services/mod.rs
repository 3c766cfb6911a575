mod conversation_store;
mod dispatcher;
mod frame_buffer;
pub mod frame_parser;
mod ledger;

pub use conversation_store::*;
pub use dispatcher::*;
pub use frame_buffer::*;
pub use ledger::*;
