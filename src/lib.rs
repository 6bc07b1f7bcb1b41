// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod api;
pub mod bus;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod models;
pub mod nodes;
pub mod pipeline;
pub mod processor;
pub mod source;
pub mod stats;
pub mod supervisor;
pub mod track;
pub mod ws;
