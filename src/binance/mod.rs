//! Binance module - Client implementation for Binance USDT-M futures

pub mod auth;
pub mod client;
pub mod messages;
pub mod rest;
pub mod websocket;

pub use client::BinanceClient;
