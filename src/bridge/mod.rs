pub mod bus;
pub mod console;
pub mod context;

pub use self::bus::{
    decode_console_args, ControlMessage, MessageBus, SubscriptionId, MAGIC_LOG_MARKER,
};
pub use self::context::{build_context_script, OFFLINE_BINDING};
