//! # Festa Channels
//! Chat platform clients. Each one implements [`festa_core::Messenger`].

pub mod telegram;

pub use telegram::{
    ChatEvent, IncomingMessage, RepliedMessage, TelegramChannel, TelegramPollingStream,
};
