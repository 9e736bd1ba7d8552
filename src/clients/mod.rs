pub mod callback_client;

pub use callback_client::{CallbackBody, CallbackClient};
