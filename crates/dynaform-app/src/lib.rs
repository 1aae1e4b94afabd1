// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod navigation;
pub mod options;
pub mod protocol;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;
pub mod workflow;

pub use navigation::*;
pub use options::*;
pub use protocol::*;
pub use query::*;
pub use schema::*;
pub use store::*;
pub use value::*;
pub use workflow::*;
