//! Integration test modules.

mod arena_flow_test;
mod common;
mod league_cycle_test;
mod websocket_test;
