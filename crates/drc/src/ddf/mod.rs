// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDF Loader (`spec.md` §4.4): parses, indexes, signs, and selects Device
//! Description Files against discovered devices.

pub mod bundle;
pub mod compat;
pub mod constants;
pub mod handle;
pub mod json;
pub mod loader;
pub mod matching;
pub mod model;

pub use bundle::{parse_bundle, Bundle, SignatureVerifier, TrustTier};
pub use constants::ConstantsTable;
pub use handle::ItemHandle;
pub use loader::DdfLoader;
pub use matching::{select, Candidate};
pub use model::{
    Binding, BindingDestination, BindingTemplate, Ddf, DdfCategory, DdfItem, DdfOrigin, DdfPolicy,
    DdfRef, DdfStatus, HookParams, ReportConfig, SubDeviceTemplate,
};
