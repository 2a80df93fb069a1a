// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI bus enumeration and memory window allocation.
//!
//! Starting from the root bus of each ECAM window, the fabric is walked
//! depth-first. Bridges are numbered as they are found and every memory BAR
//! is assigned an address from one of three bump-allocated pools. Once a
//! bridge's subtree has been walked, its memory windows are programmed to
//! enclose everything that was allocated below it.
//!
//! The result is a fully programmed hierarchy plus a [`BdfTable`] describing
//! it, suitable for handing to a later boot stage.

#![forbid(unsafe_code)]

pub mod bar;
pub mod bridge;
pub mod config;
pub mod endpoint;
pub mod enumerate;
pub mod normalize;
pub mod platform;
pub mod table;
pub mod window;

#[cfg(test)]
mod test_helpers;

pub use config::ConfigError;
pub use config::PlatformConfig;
pub use config::PoolConfig;
pub use enumerate::BusEnumerator;
pub use platform::Enumeration;
pub use platform::enumerate_platform;
pub use table::BdfRecord;
pub use table::BdfTable;
pub use table::HandoffError;
pub use table::HeaderKind;
pub use window::AllocError;
pub use window::WindowKind;
