pub mod channel;
pub mod message;

pub use channel::IpcChannel;
pub use message::IpcMessage;
