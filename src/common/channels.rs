//! Channel helpers for feed adapters

use tokio::sync::mpsc;

/// Default feed buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Create a feed channel with the default buffer size
pub fn create_feed_channel<T>() -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Create a feed channel with a custom buffer size
pub fn create_feed_channel_with_size<T>(size: usize) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(size)
}
