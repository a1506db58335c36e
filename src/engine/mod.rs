//! Position lifecycle engine
//!
//! - [`controller`]: the position controller and its state machine
//! - [`trailing`]: pure trailing-stop evaluation
//! - [`candles`]: the sliding candle window fed to signal sources
//! - [`feeds`]: supervised, reconnecting feed loops
//! - [`position`]: position and state types

pub mod candles;
pub mod controller;
pub mod feeds;
pub mod position;
pub mod trailing;

pub use candles::{CandleWindow, PushOutcome};
pub use controller::{entry_quantity, BotStatus, PositionController};
pub use feeds::{timeframe_duration, FeedLoop, ReconnectPolicy};
pub use position::{ControllerState, Position, ProtectiveOrders};
pub use trailing::{TrailingAction, TrailingParams, TrailingState};
