// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod adapter;
mod executor;
mod sink;

pub use adapter::{ActionPlan, CommandAdapter, LanguageAdapter};
pub use executor::ActionExecutor;
pub use sink::{ChannelSink, ResultSink};
