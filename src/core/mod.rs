// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core types for Lodestone
//!
//! - [`Error`] / [`Result`] - error handling
//! - [`ScalarValue`] - tagged per-document value with the explicit
//!   cross-type conversion table

pub mod error;
pub mod value;

pub use error::{Error, Result};
pub use value::{format_double, ScalarValue};

/// Local (per-segment) document identifier
pub type DocId = u32;
