//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `EventDispatcher`: Per-topic consumer routing events to the store
//! - `TickerHandler` / `MarketHandler`: Classification and log lines

pub mod dispatcher;

pub use dispatcher::{
    BatchReport, DispatchError, EventDispatcher, MarketHandler, TickerHandler, ticker_status_block,
};
